//! Owned state behind the dashboard: the loaded lead collection, the ids with
//! a status update in flight, and a broadcast of changes for subscribers.
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock};
use tracing::{info, warn};

use crate::{
    error::AppError,
    gateway::{GatewayError, LeadGateway},
    lead::{Lead, LeadStatus, StatusUpdate},
    pager::{page_links, PageLink},
    view::{derive_view, ListQuery},
};

const EVENT_CAPACITY: usize = 64;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DashboardEvent {
    Reloaded { count: usize },
    ReloadFailed { reason: String },
    StatusChanged { id: String, status: LeadStatus },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRow {
    #[serde(flatten)]
    pub lead:     Lead,
    /// Editing is disabled while true.
    pub updating: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPage {
    pub leads:       Vec<DashboardRow>,
    pub total_items: usize,
    pub total_pages: usize,
    pub page:        usize,
    pub start_index: usize,
    pub end_index:   usize,
    pub summary:     String,
    /// Canonical query string for this view, page clamped.
    pub query:       String,
    pub controls:    Vec<PageLink>,
    pub filters:     Vec<FilterLink>,
    /// Present while a search is active.
    pub clear_search: Option<String>,
}

/// A status filter choice; `status: None` is "all".
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FilterLink {
    pub status: Option<LeadStatus>,
    pub active: bool,
    pub query:  String,
}

fn filter_links(query: &ListQuery) -> Vec<FilterLink> {
    std::iter::once(None)
        .chain(LeadStatus::ALL.map(Some))
        .map(|status| FilterLink {
            status,
            active: query.status == status,
            query:  query.with_status(status).to_query_string(),
        })
        .collect()
}

pub struct Dashboard {
    gateway:   Arc<dyn LeadGateway>,
    leads:     RwLock<Option<Vec<Lead>>>,
    reloading: AsyncMutex<()>,
    in_flight: Mutex<HashSet<String>>,
    events:    broadcast::Sender<DashboardEvent>,
}

impl Dashboard {
    pub fn new(gateway: Arc<dyn LeadGateway>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            leads: RwLock::new(None),
            reloading: AsyncMutex::new(()),
            in_flight: Mutex::new(HashSet::new()),
            events,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn LeadGateway> {
        &self.gateway
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: DashboardEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the whole collection from the store. On failure the collection
    /// is dropped so no stale data is served.
    pub async fn reload(&self) -> Result<Vec<Lead>, GatewayError> {
        let _serial = self.reloading.lock().await;
        self.fetch_and_replace().await
    }

    async fn fetch_and_replace(&self) -> Result<Vec<Lead>, GatewayError> {
        match self.gateway.fetch_all().await {
            Ok(leads) => {
                *self.leads.write().await = Some(leads.clone());
                info!("dashboard holds {} leads", leads.len());
                self.notify(DashboardEvent::Reloaded { count: leads.len() });
                Ok(leads)
            }
            Err(err) => {
                *self.leads.write().await = None;
                warn!("lead reload failed: {err}");
                self.notify(DashboardEvent::ReloadFailed { reason: err.to_string() });
                Err(err)
            }
        }
    }

    async fn ensure_loaded(&self) -> Result<(), GatewayError> {
        if self.leads.read().await.is_some() {
            return Ok(());
        }

        let _serial = self.reloading.lock().await;
        // another request may have loaded while we waited
        if self.leads.read().await.is_none() {
            self.fetch_and_replace().await?;
        }
        Ok(())
    }

    pub async fn view(&self, query: &ListQuery) -> Result<DashboardPage, GatewayError> {
        self.ensure_loaded().await?;

        let leads     = self.leads.read().await;
        let view      = derive_view(leads.as_deref().unwrap_or_default(), query);
        let in_flight = self.in_flight();
        let effective = query.with_page(view.page);

        Ok(DashboardPage {
            leads: view
                .items
                .iter()
                .map(|lead| DashboardRow {
                    lead:     (*lead).clone(),
                    updating: in_flight.contains(&lead.id),
                })
                .collect(),
            total_items: view.total_items,
            total_pages: view.total_pages,
            page:        view.page,
            start_index: view.start_index,
            end_index:   view.end_index,
            summary:     view.summary(),
            query:       effective.to_query_string(),
            controls:    page_links(&effective, view.page, view.total_pages),
            filters:     filter_links(&effective),
            clear_search: effective.search.is_some().then(|| effective.without_search().to_query_string()),
        })
    }

    /// Pushes a status change to the store, then applies it locally.
    ///
    /// Nothing local changes unless the store accepted the update. If the
    /// collection was dropped or reloaded without the lead meanwhile, the
    /// accepted update is still reported and the next view refetches.
    pub async fn update_status(&self, update: StatusUpdate) -> Result<Lead, AppError> {
        self.ensure_loaded().await?;

        let known = self
            .leads
            .read()
            .await
            .iter()
            .flatten()
            .find(|lead| lead.id == update.id)
            .cloned();
        let mut updated = known.ok_or_else(|| AppError::LeadNotFound(update.id.clone()))?;

        let _marker = InFlight::acquire(&self.in_flight, &update.id)
            .ok_or_else(|| AppError::UpdateInFlight(update.id.clone()))?;

        self.gateway.update_status(&update).await?;
        updated.status = update.status;

        {
            let mut leads = self.leads.write().await;
            match leads.iter_mut().flatten().find(|lead| lead.id == update.id) {
                Some(lead) => {
                    lead.status = update.status;
                    updated = lead.clone();
                }
                None => warn!(id = %update.id, "status stored but the lead is no longer held locally"),
            }
        }

        self.notify(DashboardEvent::StatusChanged {
            id:     update.id,
            status: update.status,
        });
        Ok(updated)
    }
}

/// Marks a lead as having an update in flight until dropped.
struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    id:  String,
}

impl<'a> InFlight<'a> {
    fn acquire(ids: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let fresh = ids.lock().unwrap_or_else(PoisonError::into_inner).insert(id.to_string());
        fresh.then(|| Self { ids, id: id.to_string() })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    use super::*;
    use crate::lead::{tests::lead, NewLead};

    /// In-memory store. Updates can be made to fail or to park until released.
    #[derive(Default)]
    pub(crate) struct FakeGateway {
        pub leads:        Mutex<Vec<Lead>>,
        pub fail_fetch:   AtomicBool,
        pub fail_updates: AtomicBool,
        pub fetches:      AtomicUsize,
        pub submitted:    Mutex<Vec<NewLead>>,
        pub entered:      Notify,
        pub release:      Option<Notify>,
    }

    impl FakeGateway {
        pub(crate) fn with_leads(count: usize) -> Self {
            let leads = (1..=count)
                .map(|i| lead(&format!("lead-{i}"), &format!("First{i}"), &format!("Last{i}"), LeadStatus::Pending))
                .collect();
            Self { leads: Mutex::new(leads), ..Default::default() }
        }
    }

    #[async_trait]
    impl LeadGateway for FakeGateway {
        async fn fetch_all(&self) -> Result<Vec<Lead>, GatewayError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(GatewayError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
            Ok(self.leads.lock().unwrap().clone())
        }

        async fn update_status(&self, update: &StatusUpdate) -> Result<Value, GatewayError> {
            self.entered.notify_one();
            if let Some(release) = &self.release {
                release.notified().await;
            }
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(GatewayError::Status(StatusCode::BAD_GATEWAY));
            }
            let mut leads = self.leads.lock().unwrap();
            if let Some(lead) = leads.iter_mut().find(|lead| lead.id == update.id) {
                lead.status = update.status;
            }
            Ok(json!({ "result": "success" }))
        }

        async fn submit(&self, lead: &NewLead) -> Result<Value, GatewayError> {
            self.submitted.lock().unwrap().push(lead.clone());
            Ok(json!({ "result": "success" }))
        }
    }

    fn dashboard(gateway: FakeGateway) -> (Arc<FakeGateway>, Dashboard) {
        let gateway = Arc::new(gateway);
        let board   = Dashboard::new(gateway.clone());
        (gateway, board)
    }

    fn reached_out(id: &str) -> StatusUpdate {
        StatusUpdate { id: id.to_string(), status: LeadStatus::ReachedOut }
    }

    #[tokio::test]
    async fn view_loads_once_and_pages_the_collection() {
        let (gateway, board) = dashboard(FakeGateway::with_leads(23));

        let first = board.view(&ListQuery::default()).await.unwrap();
        assert_eq!(first.leads.len(), 10);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.query, "");

        let last = board.view(&ListQuery::default().with_page(99)).await.unwrap();
        assert_eq!(last.page, 3);
        assert_eq!(last.query, "page=3");
        assert_eq!(last.leads.len(), 3);
        assert!(last.clear_search.is_none());

        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn filter_links_reset_the_page_and_keep_the_search() {
        let (_gateway, board) = dashboard(FakeGateway::with_leads(23));
        let query = ListQuery { page: 2, status: Some(LeadStatus::Pending), search: Some("first".into()) };

        let page = board.view(&query).await.unwrap();
        let filters: Vec<(Option<LeadStatus>, bool, &str)> = page
            .filters
            .iter()
            .map(|link| (link.status, link.active, link.query.as_str()))
            .collect();

        assert_eq!(
            filters,
            vec![
                (None, false, "search=first"),
                (Some(LeadStatus::Pending), true, "status=pending&search=first"),
                (Some(LeadStatus::ReachedOut), false, "status=reached_out&search=first"),
            ]
        );
        assert_eq!(page.clear_search.as_deref(), Some("status=pending"));
    }

    #[tokio::test]
    async fn successful_update_is_visible_in_later_views() {
        let (_gateway, board) = dashboard(FakeGateway::with_leads(23));
        let mut events = board.subscribe();

        let updated = board.update_status(reached_out("lead-7")).await.unwrap();
        assert_eq!(updated.status, LeadStatus::ReachedOut);

        let page = board
            .view(&ListQuery::default().with_status(Some(LeadStatus::ReachedOut)))
            .await
            .unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.leads[0].lead.id, "lead-7");
        assert!(!page.leads[0].updating);

        assert_eq!(events.recv().await.unwrap(), DashboardEvent::Reloaded { count: 23 });
        assert_eq!(
            events.recv().await.unwrap(),
            DashboardEvent::StatusChanged { id: "lead-7".into(), status: LeadStatus::ReachedOut }
        );
    }

    #[tokio::test]
    async fn failed_update_leaves_the_collection_and_releases_the_record() {
        let gateway = FakeGateway::with_leads(23);
        gateway.fail_updates.store(true, Ordering::SeqCst);
        let (gateway, board) = dashboard(gateway);

        let err = board.update_status(reached_out("lead-7")).await.unwrap_err();
        assert!(matches!(err, AppError::Gateway(GatewayError::Status(_))));
        assert!(err.retryable());

        let page = board.view(&ListQuery::default()).await.unwrap();
        let row  = page.leads.iter().find(|row| row.lead.id == "lead-7").unwrap();
        assert_eq!(row.lead.status, LeadStatus::Pending);
        assert!(!row.updating);

        // editable again once the store recovers
        gateway.fail_updates.store(false, Ordering::SeqCst);
        board.update_status(reached_out("lead-7")).await.unwrap();
    }

    #[tokio::test]
    async fn second_update_on_the_same_record_is_refused_while_in_flight() {
        let gateway = FakeGateway { release: Some(Notify::new()), ..FakeGateway::with_leads(3) };
        let (gateway, board) = dashboard(gateway);
        let board = Arc::new(board);

        let first = tokio::spawn({
            let board = board.clone();
            async move { board.update_status(reached_out("lead-2")).await }
        });
        gateway.entered.notified().await;

        let page = board.view(&ListQuery::default()).await.unwrap();
        assert!(page.leads[1].updating);
        assert!(!page.leads[0].updating);

        let err = board.update_status(reached_out("lead-2")).await.unwrap_err();
        assert!(matches!(err, AppError::UpdateInFlight(id) if id == "lead-2"));

        gateway.release.as_ref().unwrap().notify_one();
        first.await.unwrap().unwrap();

        let page = board.view(&ListQuery::default()).await.unwrap();
        assert!(!page.leads[1].updating);
        assert_eq!(page.leads[1].lead.status, LeadStatus::ReachedOut);
    }

    #[tokio::test]
    async fn update_accepted_by_the_store_survives_a_failed_reload() {
        let gateway = FakeGateway { release: Some(Notify::new()), ..FakeGateway::with_leads(3) };
        let (gateway, board) = dashboard(gateway);
        let board = Arc::new(board);

        let pending = tokio::spawn({
            let board = board.clone();
            async move { board.update_status(reached_out("lead-2")).await }
        });
        gateway.entered.notified().await;

        gateway.fail_fetch.store(true, Ordering::SeqCst);
        assert!(board.reload().await.is_err());

        gateway.release.as_ref().unwrap().notify_one();
        let updated = pending.await.unwrap().unwrap();
        assert_eq!(updated.id, "lead-2");
        assert_eq!(updated.status, LeadStatus::ReachedOut);

        gateway.fail_fetch.store(false, Ordering::SeqCst);
        let page = board.view(&ListQuery::default()).await.unwrap();
        assert_eq!(page.leads[1].lead.status, LeadStatus::ReachedOut);
        assert!(!page.leads[1].updating);
    }

    #[tokio::test]
    async fn unknown_lead_is_not_sent_to_the_store() {
        let (gateway, board) = dashboard(FakeGateway::with_leads(3));

        let err = board.update_status(reached_out("lead-99")).await.unwrap_err();
        assert!(matches!(err, AppError::LeadNotFound(id) if id == "lead-99"));
        assert!(gateway.leads.lock().unwrap().iter().all(|lead| lead.status == LeadStatus::Pending));
    }

    #[tokio::test]
    async fn failed_reload_drops_stale_data() {
        let (gateway, board) = dashboard(FakeGateway::with_leads(5));
        board.view(&ListQuery::default()).await.unwrap();

        gateway.fail_fetch.store(true, Ordering::SeqCst);
        assert!(board.reload().await.is_err());
        assert!(board.view(&ListQuery::default()).await.is_err());

        gateway.fail_fetch.store(false, Ordering::SeqCst);
        let page = board.view(&ListQuery::default()).await.unwrap();
        assert_eq!(page.total_items, 5);
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 4);
    }
}
