//! Time-Aware Ticket ↔ Release ↔ Deployment Correlator (spec §4.7).
//!
//! Three correlation rules, all fail-closed: a missing required timestamp
//! excludes the attachment rather than guessing. This crate is deliberately
//! I/O-free — reachability (`pr.mergeSha` ∈ branch, build/component
//! cross-references) is decided by the caller (the pipeline, which has the
//! VCS/CI adapters) and passed in as a plain `bool`; the rules here are pure
//! functions over already-fetched candidate data, which is what spec §8's
//! quantified invariants (`∀ PR p, ∀ time-aware branch b ...`) are actually
//! testing.
//!
//! Grounded on `original_source/MVP1/snapshot/diagnose_ticket_deployments.py`
//! (`_env_to_stage`, `detect_tag_changes`, `build_stage_repo_info`) for the
//! heuristic fallback shape, since no crate in the `shipper` workspace
//! carries a ticket/release/deployment correlator of any kind.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use estate_types::{
    Confidence, DeploymentEvent, EnvPresenceMeta, PullRequest, Stage, Ticket, TimeAwareBranch,
    TimeAwareBuild, TimeAwareDeployment, TimelineEntry, Warning, WarningLevel, derive_stage,
};

/// `main`, `master`, `release/*` — branches for which reachability may be
/// established via a compare call rather than requiring exact tip equality
/// (spec §4.7 rule 1).
pub fn is_important_branch(name: &str) -> bool {
    name == "main" || name == "master" || name.starts_with("release/")
}

/// Rule 1, PR → Branch (spec §4.7): include iff `branch.createdAt ≥
/// pr.mergedAt` AND `reachable` is true (the caller has already proven
/// `pr.mergeSha` is the branch tip, or — for an important branch — found it
/// via compare).
pub fn attach_branch(
    pr: &PullRequest,
    branch_name: &str,
    branch_created_at: DateTime<Utc>,
    repo: &str,
    reachable: bool,
) -> Option<TimeAwareBranch> {
    if branch_created_at < pr.merged_at || !reachable {
        return None;
    }
    Some(TimeAwareBranch {
        name: branch_name.to_string(),
        created_at: branch_created_at,
        repo: repo.to_string(),
    })
}

/// Rule 2, PR → Build (spec §4.7): include iff `build.startedAt ≥
/// pr.mergedAt` AND a component in the PR's repo references this build
/// (`references_build`, decided by the caller from the assembled
/// Components).
pub fn attach_build(
    pr: &PullRequest,
    build_number: &str,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    repo: &str,
    references_build: bool,
) -> Option<TimeAwareBuild> {
    if started_at < pr.merged_at || !references_build {
        return None;
    }
    Some(TimeAwareBuild {
        build_number: build_number.to_string(),
        started_at,
        finished_at,
        repo: repo.to_string(),
    })
}

/// Rule 3, Build → Deployment (spec §4.7): include iff `deployment.at ≥
/// build.finishedAt` AND `component_tag_build_match` (decided by the
/// caller: same component, tag and build number as the build).
pub fn attach_deployment(
    build_finished_at: Option<DateTime<Utc>>,
    deployment_at: DateTime<Utc>,
    env_key: &str,
    component: &str,
    component_tag_build_match: bool,
) -> Option<TimeAwareDeployment> {
    let Some(finished_at) = build_finished_at else {
        return None;
    };
    if deployment_at < finished_at || !component_tag_build_match {
        return None;
    }
    Some(TimeAwareDeployment {
        env_key: env_key.to_string(),
        component: component.to_string(),
        at: deployment_at,
    })
}

/// Attach every time-aware deployment to `ticket` and mark env presence
/// build-driven (spec §4.7: "Environment presence is build-driven. ...set
/// true only when a time-aware deployment's component maps to that stage").
/// `env_stage_map` resolves an `envKey` to its canonical [`Stage`]; absent
/// entries fall back to substring derivation.
pub fn apply_time_aware_deployments(
    ticket: &mut Ticket,
    deployments: Vec<TimeAwareDeployment>,
    env_stage_map: &HashMap<String, Stage>,
) {
    for deployment in deployments {
        let stage = env_stage_map
            .get(&deployment.env_key)
            .copied()
            .unwrap_or_else(|| derive_stage(&deployment.env_key));
        ticket.set_env_present(
            stage,
            EnvPresenceMeta {
                when: Some(deployment.at),
                tag: None,
                branch: None,
                confidence: Confidence::High,
                source: "time_aware_deployment".to_string(),
                inferred: false,
            },
        );
        ticket.time_aware_deployments.push(deployment);
    }
}

/// Heuristic fallback (spec §4.7 "Heuristic mode", used when time-aware
/// data is absent, e.g. by history-only consumers per §4.8): mark a stage
/// present iff a deployment event exists for `(repo, stage)` with `at ≥
/// pr.mergedAt`. Confidence is `Heuristic` when the deployed branch differs
/// from the PR's `baseRef`, `High` when it matches exactly; `inferred` is
/// always attached. Returns one `(Stage, EnvPresenceMeta)` per event that
/// qualifies — callers feed these into [`estate_types::Ticket::set_env_present`].
pub fn heuristic_presence_from_events(
    pr: &PullRequest,
    events: &[DeploymentEvent],
) -> Vec<(Stage, EnvPresenceMeta)> {
    events
        .iter()
        .filter(|e| e.repo.as_deref() == Some(pr.repo.as_str()))
        .filter(|e| e.at >= pr.merged_at)
        .map(|e| {
            let stage = derive_stage(&e.env_key);
            let confidence = match &e.branch {
                Some(branch) if branch == &pr.base_ref => Confidence::High,
                _ => Confidence::Heuristic,
            };
            (
                stage,
                EnvPresenceMeta {
                    when: Some(e.at),
                    tag: Some(e.to_tag.clone()),
                    branch: e.branch.clone(),
                    confidence,
                    source: "heuristic_deployment_event".to_string(),
                    inferred: true,
                },
            )
        })
        .collect()
}

/// The conservative "within 3 days, no branch match" case (spec §4.7, §9):
/// a deployment with neither branch info nor a heuristic match but within
/// 3 days of merge is deliberately left `false`. This only produces the
/// accompanying warning the design notes require; it never sets presence.
pub fn conservative_window_warning(
    pr: &PullRequest,
    now: DateTime<Utc>,
    had_any_match: bool,
) -> Option<Warning> {
    if had_any_match {
        return None;
    }
    let age = now.signed_duration_since(pr.merged_at);
    if age <= chrono::Duration::days(3) {
        Some(
            Warning::new(
                WarningLevel::Info,
                "ticket",
                "CONSERVATIVE_NO_MATCH_WITHIN_WINDOW",
                "correlator",
                format!(
                    "PR #{} in {} merged {} ago with no branch/heuristic match; leaving presence unset per spec §9 conservative behavior",
                    pr.number, pr.repo, age
                ),
            )
            .with_component(pr.repo.clone()),
        )
    } else {
        None
    }
}

/// Persistence floor (spec §4.7, §8): carry forward every stage that was
/// `true` in the previous snapshot's ticket, unless the current run has
/// already independently established it. Never unsets a stage (rollback is
/// explicitly out of scope, spec §9).
pub fn apply_persistence_floor(ticket: &mut Ticket, prev: Option<&Ticket>) {
    let Some(prev) = prev else { return };
    for stage in Stage::ALL {
        let key = stage.as_str();
        if prev.env_presence.get(key).copied().unwrap_or(false) {
            let prev_meta = prev.env_presence_meta.get(key).cloned();
            ticket.carry_forward_presence(stage, prev_meta);
        }
    }
}

/// Build the time-ordered timeline for one ticket (spec §4.7): `PR merged`,
/// `Included in <branch>`, `Tagged as <tag>`, `Build <n>`, `Deployed to
/// <STAGE>`, each annotated `timeAware`/`fromHistory` per its origin.
pub fn build_timeline(
    pr: &PullRequest,
    branches: &[TimeAwareBranch],
    builds: &[TimeAwareBuild],
    deployments: &[(Stage, TimeAwareDeployment)],
    from_history: bool,
) -> Vec<TimelineEntry> {
    let mut entries = vec![TimelineEntry {
        kind: "pr_merged".to_string(),
        label: format!("PR #{} merged", pr.number),
        at: pr.merged_at,
        time_aware: !from_history,
        from_history,
    }];

    for branch in branches {
        entries.push(TimelineEntry {
            kind: "branch_included".to_string(),
            label: format!("Included in {}", branch.name),
            at: branch.created_at,
            time_aware: !from_history,
            from_history,
        });
    }

    for build in builds {
        entries.push(TimelineEntry {
            kind: "build".to_string(),
            label: format!("Build {}", build.build_number),
            at: build.started_at,
            time_aware: !from_history,
            from_history,
        });
    }

    for (stage, deployment) in deployments {
        entries.push(TimelineEntry {
            kind: "deployed".to_string(),
            label: format!("Deployed to {stage}"),
            at: deployment.at,
            time_aware: !from_history,
            from_history,
        });
    }

    entries.sort_by_key(|e| e.at);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr(merged_at: DateTime<Utc>, base_ref: &str) -> PullRequest {
        PullRequest::new(
            "acme/web",
            7,
            "ABC-1 fix",
            "https://x/7",
            merged_at,
            "alice",
            base_ref,
            "fix",
            Some("s1".to_string()),
            None,
        )
    }

    #[test]
    fn branch_created_before_merge_is_excluded() {
        let merged = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let earlier: DateTime<Utc> = "2026-01-09T00:00:00Z".parse().unwrap();
        assert!(attach_branch(&p, "release/1.2.0", earlier, "acme/web", true).is_none());
    }

    #[test]
    fn branch_created_after_merge_and_reachable_is_attached() {
        let merged = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let later: DateTime<Utc> = "2026-01-11T00:00:00Z".parse().unwrap();
        let attached = attach_branch(&p, "release/1.2.1", later, "acme/web", true);
        assert!(attached.is_some());
    }

    #[test]
    fn unreachable_branch_excluded_even_if_timing_fits() {
        let merged = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let later: DateTime<Utc> = "2026-01-11T00:00:00Z".parse().unwrap();
        assert!(attach_branch(&p, "release/1.2.1", later, "acme/web", false).is_none());
    }

    #[test]
    fn build_before_merge_is_excluded() {
        let merged = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let earlier: DateTime<Utc> = "2026-01-09T00:00:00Z".parse().unwrap();
        assert!(attach_build(&p, "42", earlier, None, "acme/web", true).is_none());
    }

    #[test]
    fn deployment_before_build_finish_is_excluded() {
        let finished: DateTime<Utc> = "2026-01-10T10:00:00Z".parse().unwrap();
        let earlier: DateTime<Utc> = "2026-01-10T09:00:00Z".parse().unwrap();
        assert!(attach_deployment(Some(finished), earlier, "qa", "web", true).is_none());
    }

    #[test]
    fn deployment_missing_finish_timestamp_is_excluded() {
        let at: DateTime<Utc> = "2026-01-10T10:00:00Z".parse().unwrap();
        assert!(attach_deployment(None, at, "qa", "web", true).is_none());
    }

    #[test]
    fn heuristic_matches_repo_and_cutoff() {
        let merged = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let events = vec![DeploymentEvent {
            id: "e1".to_string(),
            kind: estate_types::EventKind::Deployment,
            bootstrap: false,
            project_key: "acme".to_string(),
            env_key: "qa".to_string(),
            env_name: "QA".to_string(),
            component: "web".to_string(),
            repo: Some("acme/web".to_string()),
            branch: Some("main".to_string()),
            from_tag: "v1".to_string(),
            to_tag: "v2".to_string(),
            from_build: "1".to_string(),
            to_build: "2".to_string(),
            at: "2026-01-11T00:00:00Z".parse().unwrap(),
            by: None,
            commit_url: None,
            kustomization_url: None,
            links: vec![],
        }];
        let matches = heuristic_presence_from_events(&p, &events);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, Stage::Qa);
        assert_eq!(matches[0].1.confidence, Confidence::High);
        assert!(matches[0].1.inferred);
    }

    #[test]
    fn heuristic_marks_mismatched_branch_as_heuristic_confidence() {
        let merged = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let events = vec![DeploymentEvent {
            id: "e1".to_string(),
            kind: estate_types::EventKind::Deployment,
            bootstrap: false,
            project_key: "acme".to_string(),
            env_key: "qa".to_string(),
            env_name: "QA".to_string(),
            component: "web".to_string(),
            repo: Some("acme/web".to_string()),
            branch: Some("release/1.2".to_string()),
            from_tag: "v1".to_string(),
            to_tag: "v2".to_string(),
            from_build: "1".to_string(),
            to_build: "2".to_string(),
            at: "2026-01-11T00:00:00Z".parse().unwrap(),
            by: None,
            commit_url: None,
            kustomization_url: None,
            links: vec![],
        }];
        let matches = heuristic_presence_from_events(&p, &events);
        assert_eq!(matches[0].1.confidence, Confidence::Heuristic);
    }

    #[test]
    fn heuristic_missing_branch_is_not_high_confidence() {
        let merged = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let events = vec![DeploymentEvent {
            id: "e1".to_string(),
            kind: estate_types::EventKind::Deployment,
            bootstrap: false,
            project_key: "acme".to_string(),
            env_key: "qa".to_string(),
            env_name: "QA".to_string(),
            component: "web".to_string(),
            repo: Some("acme/web".to_string()),
            branch: None,
            from_tag: "v1".to_string(),
            to_tag: "v2".to_string(),
            from_build: "1".to_string(),
            to_build: "2".to_string(),
            at: "2026-01-11T00:00:00Z".parse().unwrap(),
            by: None,
            commit_url: None,
            kustomization_url: None,
            links: vec![],
        }];
        let matches = heuristic_presence_from_events(&p, &events);
        assert_eq!(matches[0].1.confidence, Confidence::Heuristic);
        assert_eq!(matches[0].1.branch, None);
    }

    #[test]
    fn conservative_window_warns_within_three_days_only() {
        let merged: DateTime<Utc> = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let soon = merged + chrono::Duration::days(1);
        let later = merged + chrono::Duration::days(10);
        assert!(conservative_window_warning(&p, soon, false).is_some());
        assert!(conservative_window_warning(&p, later, false).is_none());
        assert!(conservative_window_warning(&p, soon, true).is_none());
    }

    #[test]
    fn persistence_floor_carries_true_stages_forward_only() {
        let mut prev = Ticket::new("ABC-1");
        prev.set_env_present(
            Stage::Qa,
            EnvPresenceMeta {
                when: None,
                tag: None,
                branch: None,
                confidence: Confidence::High,
                source: "time_aware_deployment".to_string(),
                inferred: false,
            },
        );

        let mut current = Ticket::new("ABC-1");
        apply_persistence_floor(&mut current, Some(&prev));
        assert!(current.env_presence["QA"]);
        assert_eq!(current.env_presence_meta["QA"].source, "persisted_prev_snapshot");
        assert!(!current.env_presence["PROD"]);
    }

    #[test]
    fn timeline_is_sorted_by_time() {
        let merged: DateTime<Utc> = "2026-01-10T10:00:00Z".parse().unwrap();
        let p = pr(merged, "main");
        let branch = TimeAwareBranch {
            name: "release/1.2".to_string(),
            created_at: merged + chrono::Duration::days(2),
            repo: "acme/web".to_string(),
        };
        let build = TimeAwareBuild {
            build_number: "5".to_string(),
            started_at: merged + chrono::Duration::days(1),
            finished_at: Some(merged + chrono::Duration::days(1)),
            repo: "acme/web".to_string(),
        };
        let timeline = build_timeline(&p, &[branch], &[build], &[], false);
        assert_eq!(timeline[0].kind, "pr_merged");
        assert_eq!(timeline[1].kind, "build");
        assert_eq!(timeline[2].kind, "branch_included");
        assert!(timeline.windows(2).all(|w| w[0].at <= w[1].at));
    }
}
