//! Polling controller: authenticate, scan, notify, persist, sleep.
//!
//! The loop has three logical states. Authenticating makes sure a live
//! portal session exists (probing and re-logging as needed), Polling
//! runs one scan cycle and then waits out the interval, and Shutdown is
//! entered on Ctrl-C, releasing the session before exit. Failures below
//! session level never kill the loop; they cost at most one ticket or
//! one tick.

use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use vigia_core::ledger::SentLedger;
use vigia_core::matcher::Matcher;
use vigia_core::notify::Notifier;
use vigia_core::source::TicketSource;
use vigia_core::ticket::{Alert, RawTicket, TicketDetail};

/// Outcome of one scan cycle, for the log and for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Tickets pulled from the portal this cycle.
    pub tickets_checked: usize,
    /// Alerts delivered (or at least attempted) and recorded.
    pub sent: usize,
    /// Qualifying tickets suppressed because the ledger already had them.
    pub already_sent: usize,
    /// Tickets dropped: no qualifying match, pending, or detail failure.
    pub skipped: usize,
    /// Whether the ledger reached disk at the end of the cycle.
    pub persisted: bool,
}

pub struct Poller<S, N> {
    source: S,
    notifier: N,
    matcher: Matcher,
    ledger: SentLedger,
    interval: Duration,
}

impl<S: TicketSource, N: Notifier> Poller<S, N> {
    pub fn new(
        source: S,
        notifier: N,
        matcher: Matcher,
        ledger: SentLedger,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            notifier,
            matcher,
            ledger,
            interval,
        }
    }

    /// Long-running watch loop. Returns once `shutdown` flips to true,
    /// with the portal session released.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Watching the portal every {}s with {} knowledge entries; Ctrl-C stops after the current cycle",
            self.interval.as_secs(),
            self.matcher.entry_count()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            // Check again so an interrupt during a long cycle is not
            // deferred a full interval.
            if *shutdown.borrow() {
                break;
            }
            let next_check = chrono::Local::now()
                + chrono::Duration::seconds(self.interval.as_secs() as i64);
            debug!("Next check at {}", next_check.format("%H:%M:%S"));
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = time::sleep(self.interval) => {}
            }
        }

        info!("Interrupt received, shutting down");
        self.source.close_session().await;
        info!("Portal session released");
        Ok(())
    }

    /// Single authenticate-scan-release pass, for `--once`.
    pub async fn run_once(&mut self) -> Option<CycleSummary> {
        let summary = self.tick().await;
        self.source.close_session().await;
        summary
    }

    /// One scheduler tick: re-authenticate when needed, then scan.
    /// `None` means no session could be established and the tick was
    /// skipped.
    async fn tick(&mut self) -> Option<CycleSummary> {
        self.ensure_session().await;
        if !self.source.has_session() {
            warn!(
                "No portal session; skipping this cycle and retrying in {}s",
                self.interval.as_secs()
            );
            return None;
        }
        Some(self.run_cycle().await)
    }

    /// Authenticating state: make sure a live session exists, tearing
    /// down a dead one first. On failure the source is left without a
    /// session and the caller skips the tick.
    async fn ensure_session(&mut self) {
        if self.source.has_session() {
            if self.source.is_session_alive().await {
                return;
            }
            info!("Session expired or portal unreachable, re-authenticating");
            self.source.close_session().await;
        }

        match self.source.establish_session().await {
            Ok(()) => info!("Portal session established"),
            Err(e) => error!("Authentication failed: {e}"),
        }
    }

    /// Polling state: scan the full ticket list once.
    async fn run_cycle(&mut self) -> CycleSummary {
        let started = Instant::now();
        let mut summary = CycleSummary::default();

        let tickets = match self.source.fetch_tickets().await {
            Ok(tickets) => tickets,
            Err(e) => {
                // Session-level causes surface on the next tick through
                // the liveness probe.
                error!("Cannot fetch the ticket list: {e}");
                return summary;
            }
        };
        info!("{} open tickets on the portal", tickets.len());

        for ticket in &tickets {
            summary.tickets_checked += 1;
            self.check_ticket(ticket, &mut summary).await;
        }

        match self.ledger.persist() {
            Ok(()) => {
                summary.persisted = true;
                debug!("Ledger persisted with {} identifiers", self.ledger.len());
            }
            Err(e) => {
                // Identifiers stay recorded in memory and ride along
                // with the next successful persist.
                error!("Cannot persist the ledger: {e}");
            }
        }

        info!(
            "Cycle done in {:.1}s: {} checked, {} sent, {} already sent, {} skipped",
            started.elapsed().as_secs_f64(),
            summary.tickets_checked,
            summary.sent,
            summary.already_sent,
            summary.skipped
        );
        summary
    }

    async fn check_ticket(&mut self, ticket: &RawTicket, summary: &mut CycleSummary) {
        debug!("Checking ticket: {}", ticket.title);

        let results = self.matcher.score(&ticket.title);
        let Some(best) = results.first() else {
            summary.skipped += 1;
            return;
        };

        let id = ticket.identifier().to_string();
        if self.ledger.contains(&id) {
            debug!("Ticket {id} already notified, skipping");
            summary.already_sent += 1;
            return;
        }

        let detail = match self.source.fetch_detail(ticket).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!("Skipping ticket: {e}");
                summary.skipped += 1;
                return;
            }
        };
        if detail.is_pending {
            info!("Ticket {id} is pending on the portal, not notifying");
            summary.skipped += 1;
            return;
        }

        info!(
            "Ticket {id} matches {:?} ({} hits, system {})",
            best.entry_title, best.hit_count, best.system
        );
        let alert = Alert {
            ticket_id: id.clone(),
            entry_title: best.entry_title.clone(),
            link: ticket.link.clone(),
            description: detail.description.clone(),
            image_paths: self.download_images(&detail).await,
        };

        if let Err(e) = self.notifier.notify(&alert).await {
            // The identifier is recorded anyway: one attempt per
            // ticket, a flaky relay must not turn into a mail storm.
            warn!("Notification for ticket {id} failed: {e}");
        }
        self.ledger.record([id]);
        summary.sent += 1;
    }

    /// Fetch the ticket's inline images. A failed download costs the
    /// mail one image, never the alert.
    async fn download_images(&self, detail: &TicketDetail) -> Vec<std::path::PathBuf> {
        let mut paths = Vec::new();
        for reference in &detail.image_refs {
            match self.source.download_image(reference).await {
                Ok(path) => paths.push(path),
                Err(e) => warn!("Image left out of the alert: {e}"),
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use vigia_core::knowledge::KnowledgeBase;
    use vigia_core::source::SourceError;

    #[derive(Default)]
    struct SourceState {
        tickets: Vec<RawTicket>,
        details: HashMap<String, TicketDetail>,
        fail_detail: HashSet<String>,
        fail_auth: bool,
        fail_list: bool,
        session: bool,
        alive: bool,
        establish_calls: usize,
        close_calls: usize,
        list_calls: usize,
    }

    #[derive(Clone, Default)]
    struct MockSource(Arc<Mutex<SourceState>>);

    impl MockSource {
        fn state(&self) -> std::sync::MutexGuard<'_, SourceState> {
            self.0.lock().unwrap()
        }
    }

    #[async_trait]
    impl TicketSource for MockSource {
        async fn establish_session(&mut self) -> Result<(), SourceError> {
            let mut state = self.state();
            state.establish_calls += 1;
            if state.fail_auth {
                return Err(SourceError::Auth("bad credentials".to_string()));
            }
            state.session = true;
            state.alive = true;
            Ok(())
        }

        fn has_session(&self) -> bool {
            self.state().session
        }

        async fn is_session_alive(&self) -> bool {
            let state = self.state();
            state.session && state.alive
        }

        async fn fetch_tickets(&self) -> Result<Vec<RawTicket>, SourceError> {
            let mut state = self.state();
            state.list_calls += 1;
            if state.fail_list {
                return Err(SourceError::Network("portal down".to_string()));
            }
            Ok(state.tickets.clone())
        }

        async fn fetch_detail(&self, ticket: &RawTicket) -> Result<TicketDetail, SourceError> {
            let state = self.state();
            let id = ticket.identifier();
            if state.fail_detail.contains(id) {
                return Err(SourceError::Ticket {
                    id: id.to_string(),
                    reason: "detail page gone".to_string(),
                });
            }
            Ok(state.details.get(id).cloned().unwrap_or_default())
        }

        async fn download_image(&self, reference: &str) -> Result<PathBuf, SourceError> {
            Ok(PathBuf::from(reference))
        }

        async fn close_session(&mut self) {
            let mut state = self.state();
            state.close_calls += 1;
            state.session = false;
        }
    }

    #[derive(Clone, Default)]
    struct MockNotifier {
        sent: Arc<Mutex<Vec<Alert>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn notify(&self, alert: &Alert) -> Result<(), vigia_core::notify::NotifyError> {
            self.sent.lock().unwrap().push(alert.clone());
            if self.fail {
                return Err(vigia_core::notify::NotifyError::Delivery(
                    "relay said no".to_string(),
                ));
            }
            Ok(())
        }
    }

    fn make_matcher() -> Matcher {
        let kb: KnowledgeBase = serde_json::from_str(
            r#"{"sistemas": {"Impressoras": [
                {"titulo": "Impressora sem tinta", "categoria": "Hardware",
                 "palavras_chave": ["impressora", "tinta", "toner"]}
            ]}}"#,
        )
        .unwrap();
        Matcher::compile(&kb).unwrap()
    }

    fn make_ticket(id: &str, title: &str) -> RawTicket {
        RawTicket {
            id: Some(id.to_string()),
            title: title.to_string(),
            category: "Hardware > Impressora".to_string(),
            link: format!("https://glpi.example.org/front/ticket.form.php?id={id}"),
        }
    }

    fn make_poller(
        source: MockSource,
        notifier: MockNotifier,
        dir: &tempfile::TempDir,
    ) -> Poller<MockSource, MockNotifier> {
        let ledger = SentLedger::load(dir.path().join("chamados_enviados.json")).unwrap();
        Poller::new(
            source,
            notifier,
            make_matcher(),
            ledger,
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn test_matching_ticket_is_notified_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        source.state().tickets = vec![make_ticket("4821", "Impressora sem tinta de novo")];
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let summary = poller.tick().await.unwrap();

        assert_eq!(summary.tickets_checked, 1);
        assert_eq!(summary.sent, 1);
        assert!(summary.persisted);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].ticket_id, "4821");
        assert_eq!(sent[0].entry_title, "Impressora sem tinta");

        // The identifier reached disk.
        let on_disk =
            SentLedger::load(dir.path().join("chamados_enviados.json")).unwrap();
        assert!(on_disk.contains("4821"));
    }

    #[tokio::test]
    async fn test_same_ticket_is_not_notified_twice_across_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        source.state().tickets = vec![make_ticket("4821", "Impressora sem tinta")];
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let first = poller.tick().await.unwrap();
        let second = poller.tick().await.unwrap();

        assert_eq!(first.sent, 1);
        assert_eq!(second.sent, 0);
        assert_eq!(second.already_sent, 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_keyword_hit_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        source.state().tickets = vec![make_ticket("1", "impressora travada no corredor")];
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let summary = poller.tick().await.unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.skipped, 1);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_ticket_is_skipped_without_ledger_entry() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        {
            let mut state = source.state();
            state.tickets = vec![make_ticket("9", "Impressora sem tinta")];
            state.details.insert(
                "9".to_string(),
                TicketDetail {
                    is_pending: true,
                    ..TicketDetail::default()
                },
            );
        }
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let summary = poller.tick().await.unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.skipped, 1);
        assert!(notifier.sent.lock().unwrap().is_empty());

        // Resolved later, it can still alert.
        source.state().details.get_mut("9").unwrap().is_pending = false;
        let summary = poller.tick().await.unwrap();
        assert_eq!(summary.sent, 1);
    }

    #[tokio::test]
    async fn test_detail_failure_skips_only_that_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        {
            let mut state = source.state();
            state.tickets = vec![
                make_ticket("1", "Impressora sem tinta"),
                make_ticket("2", "Toner da impressora acabou"),
            ];
            state.fail_detail.insert("1".to_string());
        }
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let summary = poller.tick().await.unwrap();

        assert_eq!(summary.tickets_checked, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(notifier.sent.lock().unwrap()[0].ticket_id, "2");

        // The failed one is not in the ledger and gets retried next
        // cycle.
        source.state().fail_detail.clear();
        let summary = poller.tick().await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.already_sent, 1);
    }

    #[tokio::test]
    async fn test_notify_failure_still_records_the_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        source.state().tickets = vec![make_ticket("7", "Impressora sem tinta")];
        let notifier = MockNotifier {
            fail: true,
            ..MockNotifier::default()
        };

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let first = poller.tick().await.unwrap();
        let second = poller.tick().await.unwrap();

        // One attempt, then suppressed.
        assert_eq!(first.sent, 1);
        assert_eq!(second.already_sent, 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_skips_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        {
            let mut state = source.state();
            state.tickets = vec![make_ticket("1", "Impressora sem tinta")];
            state.fail_auth = true;
        }
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        assert!(poller.tick().await.is_none());
        assert_eq!(source.state().list_calls, 0);

        // Portal recovers, next tick works.
        source.state().fail_auth = false;
        assert!(poller.tick().await.is_some());
    }

    #[tokio::test]
    async fn test_dead_session_triggers_reauthentication() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        poller.tick().await.unwrap();
        assert_eq!(source.state().establish_calls, 1);

        // Portal dropped the session between ticks.
        source.state().alive = false;
        poller.tick().await.unwrap();

        let state = source.state();
        assert_eq!(state.establish_calls, 2);
        // Old session was torn down first.
        assert_eq!(state.close_calls, 1);
    }

    #[tokio::test]
    async fn test_list_failure_yields_empty_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        source.state().fail_list = true;
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let summary = poller.tick().await.unwrap();

        assert_eq!(summary, CycleSummary::default());
    }

    #[tokio::test]
    async fn test_run_stops_immediately_when_shutdown_already_set() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let (tx, rx) = watch::channel(true);
        poller.run(rx).await.unwrap();
        drop(tx);

        assert_eq!(source.state().list_calls, 0);
        assert_eq!(source.state().close_calls, 1);
    }

    #[tokio::test]
    async fn test_run_finishes_the_cycle_then_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        source.state().tickets = vec![make_ticket("4821", "Impressora sem tinta")];
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { poller.run(rx).await });
        // Let the first cycle finish and the loop park in its sleep.
        time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let state = source.state();
        assert_eq!(state.list_calls, 1);
        assert!(state.close_calls >= 1);
        assert!(!state.session);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_once_releases_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        source.state().tickets = vec![make_ticket("4821", "Impressora sem tinta")];
        let notifier = MockNotifier::default();

        let mut poller = make_poller(source.clone(), notifier.clone(), &dir);
        let summary = poller.run_once().await.unwrap();

        assert_eq!(summary.sent, 1);
        assert!(!source.state().session);
        assert_eq!(source.state().close_calls, 1);
    }
}
