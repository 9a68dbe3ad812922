//! Runs one new item through candidate collection, scoring, the decision
//! policy and the resulting label/comment/close calls.

use crate::comment;
use crate::config::DetectorConfig;
use crate::gateway::{GatewayError, ItemGateway};
use crate::item::{
    combined_text, CandidateText, ItemKind, ItemState, LabelSpec, SimilarityResult, StateFilter,
};
use crate::normalize::normalize;
use crate::policy::{self, Action};
use crate::similarity::{SimilarityEngine, SimilarityError};
use crate::util::truncate;
use futures::StreamExt;
use thiserror::Error;

/// The newly filed item being checked.
#[derive(Debug, Clone)]
pub struct Query {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub kind: ItemKind,
}

impl Query {
    pub fn normalized_text(&self) -> String {
        normalize(&combined_text(&self.title, self.body.as_deref()))
    }
}

/// Failures that stop scoring for the whole run.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("error fetching items from repository: {0}")]
    Fetch(#[source] GatewayError),

    #[error("error calculating similarities: {0}")]
    Vectorize(#[from] SimilarityError),
}

/// Candidates gathered within the scan budget.
#[derive(Debug, Default)]
pub struct CandidateSet {
    pub candidates: Vec<CandidateText>,
    /// Items that counted against `max_issues_to_check`.
    pub checked: usize,
    /// Items skipped because they could not be read.
    pub skipped_malformed: usize,
}

/// A mutation that failed. Earlier mutations are not rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub step: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct RunReport {
    pub action: Action,
    /// Set when the query text was too short to compare.
    pub skipped_short: bool,
    /// Why scoring was abandoned, if it was.
    pub aborted: Option<String>,
    pub candidates_checked: usize,
    pub closed_as_duplicate_of: Option<u64>,
    pub failures: Vec<MutationFailure>,
}

impl RunReport {
    pub fn duplicates_found(&self) -> usize {
        self.action.matches().len()
    }
}

pub struct Detector<'a, G> {
    gateway: &'a G,
    config: &'a DetectorConfig,
    engine: SimilarityEngine,
}

impl<'a, G: ItemGateway> Detector<'a, G> {
    pub fn new(gateway: &'a G, config: &'a DetectorConfig) -> Self {
        Self {
            gateway,
            config,
            engine: SimilarityEngine::new(config.min_text_length),
        }
    }

    /// Collect comparable items, newest first, until the scan budget is spent.
    pub async fn collect_candidates(&self, query: &Query) -> Result<CandidateSet, GatewayError> {
        let mut set = CandidateSet::default();
        let mut items = self.gateway.list_items(query.kind, StateFilter::All);

        loop {
            if set.checked >= self.config.max_issues_to_check {
                break;
            }
            let Some(next) = items.next().await else {
                break;
            };

            // Every record pulled from the listing spends budget.
            set.checked += 1;

            let item = match next {
                Ok(item) => item,
                Err(err) if err.is_per_item() => {
                    tracing::warn!("Skipping item: {}", err);
                    set.skipped_malformed += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            if item.number == query.number {
                continue;
            }
            // The issues listing also returns pull requests.
            if query.kind == ItemKind::Issue && item.kind == ItemKind::PullRequest {
                continue;
            }
            if item.has_any_label(&self.config.exclude_labels) {
                continue;
            }
            let normalized = normalize(&item.text());
            if normalized.is_empty() {
                continue;
            }
            set.candidates.push(CandidateText {
                number: item.number,
                title: item.title,
                normalized,
            });
        }

        Ok(set)
    }

    /// Score candidates against the query, keeping those at or above the
    /// similarity threshold, best first.
    pub fn rank(
        &self,
        normalized_query: &str,
        candidates: &[CandidateText],
    ) -> Result<Vec<SimilarityResult>, SimilarityError> {
        let texts: Vec<&str> = candidates.iter().map(|c| c.normalized.as_str()).collect();
        let scored = self.engine.score(normalized_query, &texts)?;
        let results = scored
            .into_iter()
            .map(|(idx, score)| SimilarityResult {
                number: candidates[idx].number,
                title: candidates[idx].title.clone(),
                score,
            })
            .collect();
        Ok(policy::filter_ranked(results, self.config))
    }

    /// Find items similar to `query`. Returns an empty list for short text.
    pub async fn find_similar(&self, query: &Query) -> Result<(Vec<SimilarityResult>, usize), ScanError> {
        let normalized = query.normalized_text();
        if !self.engine.accepts_query(&normalized) {
            return Ok((Vec::new(), 0));
        }
        self.scan(query, &normalized).await
    }

    /// Collect and rank candidates for a query already normalized and
    /// known to be long enough.
    async fn scan(
        &self,
        query: &Query,
        normalized: &str,
    ) -> Result<(Vec<SimilarityResult>, usize), ScanError> {
        let set = self
            .collect_candidates(query)
            .await
            .map_err(ScanError::Fetch)?;
        tracing::debug!(
            checked = set.checked,
            candidates = set.candidates.len(),
            malformed = set.skipped_malformed,
            "collected candidates"
        );
        if set.candidates.is_empty() {
            return Ok((Vec::new(), set.checked));
        }

        let ranked = self.rank(normalized, &set.candidates)?;
        Ok((ranked, set.checked))
    }

    /// Check one item and apply whatever the policy decides.
    pub async fn process_item(&self, query: &Query) -> RunReport {
        tracing::info!(
            "Processing {} #{}: {}",
            query.kind,
            query.number,
            truncate(&query.title, 80)
        );

        let mut report = RunReport {
            action: Action::NoAction,
            skipped_short: false,
            aborted: None,
            candidates_checked: 0,
            closed_as_duplicate_of: None,
            failures: Vec::new(),
        };

        let normalized = query.normalized_text();
        let normalized_len = normalized.chars().count();
        if !self.engine.accepts_query(&normalized) {
            tracing::info!(
                "Text too short for meaningful comparison: {} chars",
                normalized_len
            );
            report.skipped_short = true;
            return report;
        }

        let ranked = match self.scan(query, &normalized).await {
            Ok((ranked, checked)) => {
                report.candidates_checked = checked;
                ranked
            }
            Err(err) => {
                tracing::error!("{}", err);
                if matches!(err, ScanError::Fetch(_)) {
                    tracing::error!("This might be due to API rate limits or permissions issues.");
                }
                report.aborted = Some(err.to_string());
                return report;
            }
        };

        for result in &ranked {
            tracing::info!(
                "  - #{}: {} (Similarity: {:.2}%)",
                result.number,
                truncate(&result.title, 60),
                result.score * 100.0
            );
        }

        report.action = policy::decide(&ranked, self.config);
        self.apply(query, &mut report).await;
        report
    }

    /// Issue the gateway calls implied by `report.action`, in order: ensure
    /// label, attach label, summary comment, then closing comment and close.
    async fn apply(&self, query: &Query, report: &mut RunReport) {
        let (spec, best) = match &report.action {
            Action::NoAction => {
                tracing::info!("No duplicates found for {} #{}", query.kind, query.number);
                return;
            }
            Action::FlagPossible { matches } => {
                tracing::warn!("Possible duplicate detected ({:.2}%)", matches[0].score * 100.0);
                (
                    LabelSpec::possible_duplicate(&self.config.label_possible_duplicate),
                    matches[0].score,
                )
            }
            Action::FlagExact { matches, .. } => {
                tracing::warn!("High similarity detected ({:.2}%)", matches[0].score * 100.0);
                (
                    LabelSpec::exact_duplicate(&self.config.label_exact_duplicate),
                    matches[0].score,
                )
            }
        };
        tracing::debug!(best, label = %spec.name, "flagging");

        if let Err(err) = self.gateway.ensure_label(&spec).await {
            report.fail("ensure_label", err);
        }

        match self.gateway.add_label(query.number, &spec.name).await {
            Ok(()) => tracing::info!(
                "Added label '{}' to {} #{}",
                spec.name,
                query.kind,
                query.number
            ),
            Err(err) => report.fail("add_label", err),
        }

        let summary = comment::duplicate_summary(
            query.kind,
            report.action.shown(self.config.max_similar_to_show),
        );
        match self.gateway.add_comment(query.number, &summary).await {
            Ok(()) => tracing::info!(
                "Added duplicate detection comment to {} #{}",
                query.kind,
                query.number
            ),
            Err(err) => report.fail("add_comment", err),
        }

        let Some(target) = report.action.close_target(query.kind, self.config) else {
            return;
        };

        let notice = comment::closing_notice(query.kind, target);
        if let Err(err) = self.gateway.add_comment(query.number, &notice).await {
            report.fail("add_closing_comment", err);
        }
        match self
            .gateway
            .set_state(query.number, ItemState::Closed)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "Closed {} #{} as duplicate of #{}",
                    query.kind,
                    query.number,
                    target
                );
                report.closed_as_duplicate_of = Some(target);
            }
            Err(err) => report.fail("close", err),
        }
    }
}

impl RunReport {
    fn fail(&mut self, step: &'static str, err: GatewayError) {
        tracing::error!("Error during {}: {}", step, err);
        self.failures.push(MutationFailure {
            step,
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::{Call, MemoryGateway};
    use crate::item::Item;

    fn issue(number: u64, title: &str, body: Option<&str>, labels: &[&str]) -> Item {
        Item {
            number,
            title: title.to_string(),
            body: body.map(str::to_string),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            state: ItemState::Open,
            kind: ItemKind::Issue,
        }
    }

    fn pull(number: u64, title: &str, body: Option<&str>) -> Item {
        Item {
            kind: ItemKind::PullRequest,
            ..issue(number, title, body, &[])
        }
    }

    fn query(number: u64, title: &str, body: Option<&str>, kind: ItemKind) -> Query {
        Query {
            number,
            title: title.to_string(),
            body: body.map(str::to_string),
            kind,
        }
    }

    const LOGIN_TITLE: &str = "Login button does nothing on Safari";
    const LOGIN_BODY: &str = "Clicking the login button on Safari 17 has no effect.";

    fn unrelated() -> Item {
        issue(
            2,
            "Export report to CSV",
            Some("Allow exporting the monthly report as a CSV file."),
            &[],
        )
    }

    #[tokio::test]
    async fn test_similar_title_is_possible_duplicate() {
        let gateway = MemoryGateway::with_items(vec![issue(
            3,
            "Add a dark theme option in settings",
            None,
            &[],
        )]);
        // This pair scores ~0.34, so the base threshold is lowered.
        let config = DetectorConfig {
            similarity_threshold: 0.3,
            ..Default::default()
        };
        let detector = Detector::new(&gateway, &config);

        let report = detector
            .process_item(&query(10, "Add dark mode to settings", None, ItemKind::Issue))
            .await;

        assert!(matches!(report.action, Action::FlagPossible { .. }));
        assert!(report.failures.is_empty());
        let calls = gateway.calls();
        assert_eq!(calls[0], Call::EnsureLabel("possible-duplicate".to_string()));
        assert_eq!(calls[1], Call::AddLabel(10, "possible-duplicate".to_string()));
        match &calls[2] {
            Call::AddComment(10, body) => {
                assert!(body.contains("- #3: Add a dark theme option in settings (Similarity: 34%)"))
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert_eq!(calls.len(), 3);
    }

    #[tokio::test]
    async fn test_default_threshold_ignores_loose_match() {
        let gateway = MemoryGateway::with_items(vec![issue(
            3,
            "Add a dark theme option in settings",
            None,
            &[],
        )]);
        let config = DetectorConfig::default();
        let report = Detector::new(&gateway, &config)
            .process_item(&query(10, "Add dark mode to settings", None, ItemKind::Issue))
            .await;
        assert_eq!(report.action, Action::NoAction);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_identical_issue_is_closed_when_enabled() {
        let gateway = MemoryGateway::with_items(vec![
            unrelated(),
            issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &[]),
        ]);
        let config = DetectorConfig {
            auto_close_exact_match: true,
            ..Default::default()
        };
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;

        match &report.action {
            Action::FlagExact {
                matches,
                best_match,
            } => {
                assert_eq!(*best_match, 4);
                assert!((matches[0].score - 1.0).abs() < 1e-9);
            }
            other => panic!("expected exact match, got {:?}", other),
        }
        assert_eq!(report.closed_as_duplicate_of, Some(4));
        assert_eq!(
            gateway.states.lock().unwrap().get(&11),
            Some(&ItemState::Closed)
        );
        let comments = gateway.comments.lock().unwrap().clone();
        assert_eq!(comments.len(), 2);
        assert!(comments[0].1.contains("(Similarity: 100%)"));
        assert!(comments[1].1.contains("exact duplicate of #4"));
        assert!(gateway.item_labels.lock().unwrap()[&11].contains("duplicate"));
    }

    #[tokio::test]
    async fn test_identical_issue_not_closed_by_default() {
        let gateway = MemoryGateway::with_items(vec![issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &[])]);
        let config = DetectorConfig::default();
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;
        assert!(matches!(report.action, Action::FlagExact { .. }));
        assert_eq!(report.closed_as_duplicate_of, None);
        assert!(!gateway
            .calls()
            .iter()
            .any(|c| matches!(c, Call::SetState(..))));
    }

    #[tokio::test]
    async fn test_identical_pull_request_is_never_closed() {
        let gateway = MemoryGateway::with_items(vec![pull(4, LOGIN_TITLE, Some(LOGIN_BODY))]);
        let config = DetectorConfig {
            auto_close_exact_match: true,
            ..Default::default()
        };
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::PullRequest))
            .await;

        assert!(matches!(report.action, Action::FlagExact { best_match: 4, .. }));
        let calls = gateway.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], Call::AddLabel(11, "duplicate".to_string()));
        match &calls[2] {
            Call::AddComment(11, body) => assert!(body.contains("existing pull requests")),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_text_fetches_nothing() {
        let gateway = MemoryGateway::with_items(vec![issue(4, "Bug", None, &[])]);
        let config = DetectorConfig::default();
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, "Bug", None, ItemKind::Issue))
            .await;
        assert!(report.skipped_short);
        assert_eq!(report.duplicates_found(), 0);
        assert_eq!(gateway.listed(), 0);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_find_similar_ranks_and_reports_checked() {
        let gateway = MemoryGateway::with_items(vec![
            unrelated(),
            issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &[]),
        ]);
        let config = DetectorConfig::default();
        let detector = Detector::new(&gateway, &config);

        let (ranked, checked) = detector
            .find_similar(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await
            .unwrap();
        assert_eq!(checked, 2);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].number, 4);

        let (ranked, checked) = detector
            .find_similar(&query(12, "Bug", None, ItemKind::Issue))
            .await
            .unwrap();
        assert!(ranked.is_empty());
        assert_eq!(checked, 0);
        assert_eq!(gateway.listed(), 2);
    }

    #[tokio::test]
    async fn test_excluded_labels_empty_candidate_set() {
        let gateway = MemoryGateway::with_items(vec![
            issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &["wontfix"]),
            issue(5, LOGIN_TITLE, Some(LOGIN_BODY), &["invalid", "bug"]),
        ]);
        let config = DetectorConfig::default();
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;
        assert_eq!(report.action, Action::NoAction);
        assert_eq!(report.candidates_checked, 2);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_query_item_excludes_itself() {
        let gateway = MemoryGateway::with_items(vec![issue(5, LOGIN_TITLE, Some(LOGIN_BODY), &[])]);
        let config = DetectorConfig::default();
        let detector = Detector::new(&gateway, &config);
        let q = query(5, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue);

        let set = detector.collect_candidates(&q).await.unwrap();
        assert!(set.candidates.iter().all(|c| c.number != 5));
        assert_eq!(set.checked, 1);

        let report = detector.process_item(&q).await;
        assert_eq!(report.action, Action::NoAction);
    }

    #[tokio::test]
    async fn test_issue_scan_skips_pull_requests() {
        let gateway = MemoryGateway::with_items(vec![pull(4, LOGIN_TITLE, Some(LOGIN_BODY))]);
        let config = DetectorConfig::default();
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;
        assert_eq!(report.action, Action::NoAction);
        assert_eq!(report.candidates_checked, 1);
    }

    #[tokio::test]
    async fn test_scan_budget_stops_listing() {
        let gateway = MemoryGateway::with_items(vec![
            unrelated(),
            issue(3, "Dark mode", Some("Please add a dark mode."), &[]),
            issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &[]),
        ]);
        let config = DetectorConfig {
            max_issues_to_check: 2,
            ..Default::default()
        };
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;
        assert_eq!(report.action, Action::NoAction);
        assert_eq!(report.candidates_checked, 2);
        assert_eq!(gateway.listed(), 2);
    }

    #[tokio::test]
    async fn test_pull_requests_count_against_scan_budget() {
        let mut items: Vec<Item> = (100..600)
            .map(|n| pull(n, LOGIN_TITLE, Some(LOGIN_BODY)))
            .collect();
        items.push(issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &[]));
        let gateway = MemoryGateway::with_items(items);
        let config = DetectorConfig {
            max_issues_to_check: 2,
            ..Default::default()
        };
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;
        assert_eq!(report.action, Action::NoAction);
        assert_eq!(report.candidates_checked, 2);
        assert!(gateway.listed() <= config.max_issues_to_check + 1);
    }

    #[tokio::test]
    async fn test_malformed_item_is_skipped() {
        let mut gateway = MemoryGateway::with_items(vec![issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &[])]);
        gateway.items.insert(0, Err("missing labels".to_string()));
        let config = DetectorConfig::default();
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;
        assert!(matches!(report.action, Action::FlagExact { best_match: 4, .. }));
        assert_eq!(report.candidates_checked, 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_no_duplicates() {
        let mut gateway = MemoryGateway::with_items(vec![
            issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &[]),
            unrelated(),
        ]);
        gateway.fail_listing_after = Some(1);
        let config = DetectorConfig::default();
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;
        assert_eq!(report.action, Action::NoAction);
        assert!(report
            .aborted
            .as_deref()
            .is_some_and(|m| m.contains("listing failed")));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_vectorization_failure_reports_no_duplicates() {
        let stop_words_only = "this is the one that we have to do it";
        let gateway = MemoryGateway::with_items(vec![issue(4, stop_words_only, None, &[])]);
        let config = DetectorConfig::default();
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, stop_words_only, None, ItemKind::Issue))
            .await;
        assert_eq!(report.action, Action::NoAction);
        assert!(report
            .aborted
            .as_deref()
            .is_some_and(|m| m.contains("empty vocabulary")));
    }

    #[tokio::test]
    async fn test_mutation_failure_does_not_stop_later_steps() {
        let mut gateway = MemoryGateway::with_items(vec![issue(4, LOGIN_TITLE, Some(LOGIN_BODY), &[])]);
        gateway.fail_ops.insert("ensure_label");
        gateway.fail_ops.insert("add_comment");
        let config = DetectorConfig {
            auto_close_exact_match: true,
            ..Default::default()
        };
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;

        let steps: Vec<_> = report.failures.iter().map(|f| f.step).collect();
        assert_eq!(steps, vec!["ensure_label", "add_comment", "add_closing_comment"]);
        assert_eq!(report.closed_as_duplicate_of, Some(4));
        assert!(gateway.item_labels.lock().unwrap()[&11].contains("duplicate"));
    }

    #[tokio::test]
    async fn test_comment_lists_at_most_max_similar() {
        let items: Vec<Item> = (20..28)
            .map(|n| issue(n, LOGIN_TITLE, Some(LOGIN_BODY), &[]))
            .collect();
        let gateway = MemoryGateway::with_items(items);
        let config = DetectorConfig {
            max_similar_to_show: 3,
            ..Default::default()
        };
        let report = Detector::new(&gateway, &config)
            .process_item(&query(11, LOGIN_TITLE, Some(LOGIN_BODY), ItemKind::Issue))
            .await;

        assert_eq!(report.duplicates_found(), 8);
        let comments = gateway.comments.lock().unwrap().clone();
        let listed = comments[0].1.lines().filter(|l| l.starts_with("- #")).count();
        assert_eq!(listed, 3);
        // Ties keep fetch order.
        assert!(comments[0].1.contains("- #20:"));
        assert!(!comments[0].1.contains("- #23:"));
    }
}
