//! Ticket Index Builder (spec §4.6): scans recently merged PRs in every
//! unique repo observed this run, extracts ticket keys, and builds the
//! ticket index with optional Tracker enrichment and a component-metadata
//! fallback when the VCS returns nothing.

use std::collections::HashMap;

use estate_tracker::TrackerAdapter;
use estate_types::{Confidence, EnvPresenceMeta, Evidence, EstateError, Stage, Ticket};
use estate_vcs::VcsAdapter;
use regex::Regex;

/// A deployed branch observed for one `(project, env, repo)` this run, used
/// for the PR-based heuristic env-presence rule (spec §4.6).
#[derive(Debug, Clone)]
pub struct DeployedBranch {
    pub project_key: String,
    pub env_key: String,
    pub repo: String,
    pub branch: String,
}

fn split_owner_repo(full: &str) -> (&str, &str) {
    full.split_once('/').unwrap_or((full, full))
}

/// Extract all ticket keys from `text` using `regex`, de-duplicated in
/// first-seen order.
pub fn extract_ticket_keys(regex: &Regex, text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in regex.find_iter(text) {
        let key = m.as_str().to_string();
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    seen
}

/// Build the ticket index for one run (spec §4.6). `repos` are the unique
/// `owner/repo` code repos observed across every environment this run.
#[allow(clippy::too_many_arguments)]
pub fn build_index(
    vcs: &VcsAdapter,
    repos: &[String],
    since_days: u32,
    per_repo_limit: u32,
    ticket_regex: &Regex,
    deployed_branches: &[DeployedBranch],
    fallback_strings: &[String],
    tracker: Option<&TrackerAdapter>,
    tracker_enrichment_cap: usize,
) -> HashMap<String, Ticket> {
    let mut tickets: HashMap<String, Ticket> = HashMap::new();
    let mut any_pr_seen = false;

    for repo in repos {
        let (owner, name) = split_owner_repo(repo);
        let prs = match vcs.list_recent_merged_prs(owner, name, since_days, per_repo_limit) {
            Ok(prs) => prs,
            Err(e) => {
                tracing::warn!(repo, error = %e, "failed to list merged PRs");
                continue;
            }
        };

        for pr in prs {
            any_pr_seen = true;
            let haystack = format!("{} {}", pr.title, pr.body.as_deref().unwrap_or_default());
            for key in extract_ticket_keys(ticket_regex, &haystack) {
                let ticket = tickets.entry(key.clone()).or_insert_with(|| Ticket::new(key.clone()));
                if !ticket.repos.contains(repo) {
                    ticket.repos.push(repo.clone());
                }

                for deployed in deployed_branches
                    .iter()
                    .filter(|d| &d.repo == repo && d.branch == pr.base_ref)
                {
                    let stage = stage_for_env(&deployed.env_key);
                    ticket.set_env_present(
                        stage,
                        EnvPresenceMeta {
                            when: Some(pr.merged_at),
                            tag: None,
                            branch: Some(deployed.branch.clone()),
                            confidence: Confidence::Heuristic,
                            source: "pr_base_ref".to_string(),
                            inferred: false,
                        },
                    );
                }

                ticket.prs.push(pr.clone());
            }
        }
    }

    if !any_pr_seen {
        for text in fallback_strings {
            for key in extract_ticket_keys(ticket_regex, text) {
                let ticket = tickets.entry(key.clone()).or_insert_with(|| Ticket::new(key.clone()));
                ticket.evidence.push(Evidence {
                    source: "component_metadata".to_string(),
                    detail: text.clone(),
                });
            }
        }
    }

    for ticket in tickets.values_mut() {
        ticket.prs.sort_by(|a, b| b.merged_at.cmp(&a.merged_at));
    }

    if let Some(tracker) = tracker {
        enrich_with_tracker(&mut tickets, tracker, tracker_enrichment_cap);
    }

    tickets
}

fn stage_for_env(env_key: &str) -> Stage {
    estate_types::derive_stage(env_key)
}

/// Populate `ticket.tracker` for up to `cap` tickets (spec §4.6: "bounded to
/// ≤250 tickets per run"). Stops early if the tracker signals a rate limit,
/// per §4.2's "429 breaks the enrichment loop".
fn enrich_with_tracker(tickets: &mut HashMap<String, Ticket>, tracker: &TrackerAdapter, cap: usize) {
    let mut keys: Vec<&String> = tickets.keys().collect();
    keys.sort();
    let mut enriched = 0;

    for key in keys.drain(..) {
        if enriched >= cap {
            break;
        }
        let key = key.clone();
        match tracker.get_issue(&key) {
            Ok(Some(info)) => {
                if let Some(ticket) = tickets.get_mut(&key) {
                    ticket.attach_tracker(estate_types::TrackerInfo {
                        summary: info.summary,
                        status: info.status,
                        assignee: info.assignee,
                        fix_versions: info.fix_versions,
                        url: info.url,
                        project: info.project,
                    });
                }
                enriched += 1;
            }
            Ok(None) => {
                enriched += 1;
            }
            Err(EstateError::UpstreamRateLimit) => break,
            Err(e) => {
                tracing::warn!(key, error = %e, "tracker enrichment failed");
                enriched += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use estate_types::PullRequest;

    fn ticket_regex() -> Regex {
        Regex::new(r"\b[A-Z][A-Z0-9]+-\d+\b").unwrap()
    }

    #[test]
    fn extract_ticket_keys_dedups_in_order() {
        let keys = extract_ticket_keys(&ticket_regex(), "ABC-1 fixes ABC-1 and DEF-2");
        assert_eq!(keys, vec!["ABC-1".to_string(), "DEF-2".to_string()]);
    }

    #[test]
    fn heuristic_env_presence_matches_base_ref() {
        let mut tickets: HashMap<String, Ticket> = HashMap::new();
        let pr = PullRequest::new(
            "acme/web",
            7,
            "ABC-1 fix",
            "https://x/7",
            Utc::now(),
            "alice",
            "main",
            "fix",
            Some("sha1".to_string()),
            None,
        );
        let ticket = tickets.entry("ABC-1".to_string()).or_insert_with(|| Ticket::new("ABC-1"));
        ticket.prs.push(pr.clone());

        let deployed = DeployedBranch {
            project_key: "acme".to_string(),
            env_key: "qa".to_string(),
            repo: "acme/web".to_string(),
            branch: "main".to_string(),
        };
        if deployed.repo == pr.repo && deployed.branch == pr.base_ref {
            ticket.set_env_present(
                stage_for_env(&deployed.env_key),
                EnvPresenceMeta {
                    when: Some(pr.merged_at),
                    tag: None,
                    branch: Some(deployed.branch.clone()),
                    confidence: Confidence::Heuristic,
                    source: "pr_base_ref".to_string(),
                    inferred: false,
                },
            );
        }
        assert!(ticket.env_presence["QA"]);
    }

    #[test]
    fn component_metadata_fallback_only_used_when_no_prs() {
        let regex = ticket_regex();
        let fallback = vec!["svc-ABC-9-v1.0.0".to_string()];
        let mut tickets: HashMap<String, Ticket> = HashMap::new();
        for text in &fallback {
            for key in extract_ticket_keys(&regex, text) {
                let ticket = tickets.entry(key.clone()).or_insert_with(|| Ticket::new(key));
                ticket.evidence.push(Evidence { source: "component_metadata".to_string(), detail: text.clone() });
            }
        }
        assert!(tickets.contains_key("ABC-9"));
        assert_eq!(tickets["ABC-9"].evidence[0].source, "component_metadata");
    }
}
