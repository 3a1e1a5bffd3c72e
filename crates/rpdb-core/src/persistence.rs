// The cache-first facade over the API.
//
// Exposes the same operation surface as `rpdb_api::ApiClient`, but
// reads answer from the local mirror and mutations merge their result
// back into it before notifying observers. Owns every background task:
// the scheduler loop, the observer drain feeding it and the socket.

use std::sync::{Arc, Weak};

use rpdb_api::model::{
    Attribute, BulkData, BulkResponse, BulkStatus, DateTime, Entry, EntryFilter,
    ResponseMessage, ResponseMessageWrapper, SocketMessage, Update, UpdateData, UpdateRequest,
};
use rpdb_api::{ApiClient, ApiConfig, EntryDeleteFiltered, Error};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::bus::{UpdateBus, UpdateObserver};
use crate::config::PersistenceOptions;
use crate::scheduler::Scheduler;
use crate::socket::Socket;
use crate::store::{AttributeStore, EntryStore};

/// Cache-first client for the scheduling service.
///
/// Created with [`new`](Persistence::new) and booted with
/// [`start`](Persistence::start); none of the data operations may be
/// used before `start` succeeded. Cheaply cloneable; dropping the last
/// clone cancels all background tasks.
#[derive(Clone)]
pub struct Persistence {
    inner: Arc<PersistenceInner>,
}

struct PersistenceInner {
    api: Arc<ApiClient>,
    attributes: Arc<AttributeStore>,
    entries: Arc<EntryStore>,
    bus: Arc<UpdateBus>,
    scheduler: Arc<Scheduler>,
    socket: Arc<Socket>,
    options: PersistenceOptions,
    cancel: CancellationToken,
}

impl Drop for PersistenceInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Persistence {
    /// Wire up the persistence layer. Does not talk to the server yet;
    /// call [`start`](Self::start) to load the data and boot the
    /// background tasks.
    pub fn new(mut api_config: ApiConfig, options: PersistenceOptions) -> Result<Self, Error> {
        // Attributes are cached locally, so the server must not expand
        // them inside every entry.
        api_config.treat_as_java_client = true;
        let api_key = api_config.api_key.clone();

        let api = Arc::new(ApiClient::new(api_config)?);
        let cancel = CancellationToken::new();

        let attributes = Arc::new(AttributeStore::new());
        let entries = Arc::new(EntryStore::new(Arc::clone(&attributes)));
        let bus = Arc::new(UpdateBus::new());

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&entries),
            Arc::clone(&bus),
            Arc::clone(&api),
            options.scheduler,
            options.executor.clone(),
            options.exec_response_executor.clone(),
            cancel.child_token(),
        ));

        let socket = Arc::new(Socket::new(
            options.socket.clone(),
            api_key,
            Arc::clone(&bus),
            cancel.child_token(),
        ));

        let persistence = Persistence {
            inner: Arc::new(PersistenceInner {
                api,
                attributes,
                entries,
                bus,
                scheduler,
                socket,
                options,
                cancel,
            }),
        };

        // The socket must not keep the facade alive, so the handler
        // only holds a weak reference.
        let weak: Weak<PersistenceInner> = Arc::downgrade(&persistence.inner);
        persistence
            .inner
            .socket
            .set_on_message(Arc::new(move |message| {
                if let Some(inner) = weak.upgrade() {
                    Persistence { inner }.handle_socket_message(message);
                }
            }));

        Ok(persistence)
    }

    /// Boot the layer: load both entity sets, link them, start the
    /// scheduler and (when enabled) the socket. Blocks until the
    /// initial load finished.
    pub async fn start(&self) -> Result<(), Error> {
        self.reload_data().await?;

        // The scheduler re-arms its timer on every update.
        self.inner.scheduler.start_scheduling();
        let mut observer = self.inner.bus.register_observer();
        let scheduler = Arc::clone(&self.inner.scheduler);
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("stopped listening for updates (execution)");
                        break;
                    }
                    update = observer.recv() => {
                        if update.is_none() {
                            break;
                        }
                        scheduler.schedule();
                    }
                }
            }
        });

        self.inner.socket.start();
        Ok(())
    }

    /// Force a full reload of the cached data and re-notify observers.
    /// Locally received `no_db` entries and execution flags are lost.
    pub async fn reload_data(&self) -> Result<(), Error> {
        let fetch_start = DateTime::now();

        let default_filter = EntryFilter::default();
        let (entries, attributes) = tokio::join!(
            self.inner.api.get_entries(&default_filter),
            self.inner.api.get_attributes(),
        );
        let attributes = attributes?;
        let entries = entries?;

        self.inner.attributes.replace_all(attributes);
        self.inner.entries.replace_all(entries);
        // The entries arrived with attribute stubs only.
        self.inner.entries.link_all();

        self.inner.bus.set_version_date(fetch_start);

        if let Some(hook) = &self.inner.options.before_initial_update_request {
            hook(self);
        }
        self.inner.bus.notify(None);

        Ok(())
    }

    /// Cancel all background tasks. Also happens when the last clone
    /// is dropped.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    // ── Component access ─────────────────────────────────────────────

    /// The underlying API client, bypassing the cache.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.inner.api
    }

    /// Current data version and version date.
    pub fn version_info(&self) -> (i64, DateTime) {
        self.inner.bus.version_info()
    }

    /// Register an observer that receives every update of the cached
    /// data. The first delivery after a (re)load is empty and means
    /// "everything may have changed".
    pub fn register_observer(&self) -> UpdateObserver {
        self.inner.bus.register_observer()
    }

    /// Remove an observer and close its channel.
    pub fn remove_observer(&self, observer: UpdateObserver) {
        self.inner.bus.remove_observer(observer);
    }

    // ── Entry reads (cache only) ─────────────────────────────────────

    pub fn get_entry(&self, id: i64) -> Result<Arc<Entry>, Error> {
        self.inner
            .entries
            .get(id)
            .ok_or_else(|| Error::entry_not_found(id))
    }

    /// Query entries. Locally handleable filters are evaluated against
    /// the cache; everything else is delegated to the server and the
    /// result relinked.
    pub async fn get_entries(&self, filter: &EntryFilter) -> Result<Vec<Arc<Entry>>, Error> {
        if filter.is_zero() {
            return Ok(self.inner.entries.get_all());
        }

        if filter.can_handle_locally() && filter.executed.is_empty() {
            return Ok(self.inner.entries.get_filtered(filter));
        }

        let entries = self.inner.api.get_entries(filter).await?;
        self.inner.entries.link_slice(&entries);
        Ok(entries.into_iter().map(Arc::new).collect())
    }

    /// All cached entries, sorted by date.
    pub fn get_entries_all(&self) -> Vec<Arc<Entry>> {
        self.inner.entries.get_all()
    }

    // ── Attribute reads (cache only) ─────────────────────────────────

    pub fn get_attribute(&self, id: i64) -> Result<Arc<Attribute>, Error> {
        self.inner
            .attributes
            .get(id)
            .ok_or_else(|| Error::attribute_not_found(id))
    }

    pub fn get_attribute_by_name(&self, name: &str) -> Result<Arc<Attribute>, Error> {
        self.inner
            .attributes
            .get_by_name(name)
            .ok_or_else(|| Error::attribute_not_found(name))
    }

    pub fn get_attributes(&self) -> Vec<Arc<Attribute>> {
        self.inner.attributes.get_all()
    }

    // ── Entry mutations ──────────────────────────────────────────────

    pub async fn create_entry(&self, entry: &Entry) -> Result<Arc<Entry>, Error> {
        let created = self.inner.api.create_entry(entry).await?;
        self.inner.entries.link(&created);

        let created = Arc::new(created);
        self.inner.entries.add_sorted([Arc::clone(&created)]);

        self.notify_entries(vec![], vec![], vec![(*created).clone()]);
        Ok(created)
    }

    pub async fn create_entries(
        &self,
        entries: &[Entry],
    ) -> Result<(Vec<Arc<Entry>>, BulkResponse<Entry>), Error> {
        let (created, bulk) = self.inner.api.create_entries(entries).await?;
        Ok((self.merge_touched(created), bulk))
    }

    pub async fn update_entry(&self, entry: &Entry) -> Result<Arc<Entry>, Error> {
        let updated = self.inner.api.update_entry(entry).await?;

        self.inner.entries.remove(entry.id);
        self.inner.entries.link(&updated);
        let updated = Arc::new(updated);
        self.inner.entries.add_sorted([Arc::clone(&updated)]);

        self.notify_entries(vec![], vec![(*updated).clone()], vec![]);
        Ok(updated)
    }

    pub async fn update_entries(
        &self,
        entries: &[Entry],
    ) -> Result<(Vec<Arc<Entry>>, BulkResponse<Entry>), Error> {
        let (updated, bulk) = self.inner.api.update_entries(entries).await?;
        Ok((self.merge_replaced(updated), bulk))
    }

    pub async fn patch_entries(
        &self,
        entries: &[Entry],
    ) -> Result<(Vec<Arc<Entry>>, BulkResponse<Entry>), Error> {
        let (patched, bulk) = self.inner.api.patch_entries(entries).await?;
        Ok((self.merge_replaced(patched), bulk))
    }

    /// Delete a single entry. Entries of a `no_db` attribute exist only
    /// locally, so the server is not contacted for them.
    pub async fn delete_entry(&self, id: i64) -> Result<ResponseMessageWrapper, Error> {
        let no_db = self
            .inner
            .entries
            .get(id)
            .is_some_and(|e| e.attribute.get().no_db);

        let response = if no_db {
            ResponseMessageWrapper {
                message: ResponseMessage::new("The entry was successfully deleted"),
            }
        } else {
            self.inner.api.delete_entry(id).await?
        };

        if self.inner.entries.remove(id).is_some() {
            self.notify_entries(vec![id], vec![], vec![]);
        } else {
            debug!(entry = id, "no entry found to remove");
        }

        Ok(response)
    }

    /// Delete a batch of entries by id. `no_db` entries are filtered
    /// out of the server call and reported as synthetic deleted rows.
    /// Returns all deleted ids and the combined bulk response.
    pub async fn delete_entries(
        &self,
        ids: &[i64],
    ) -> Result<(Vec<i64>, BulkResponse<i64>), Error> {
        let (no_db, remote): (Vec<i64>, Vec<i64>) = ids.iter().copied().partition(|id| {
            self.inner
                .entries
                .get(*id)
                .is_some_and(|e| e.attribute.get().no_db)
        });

        let (mut deleted, mut bulk) = if remote.is_empty() {
            let mut bulk = BulkResponse::<i64>::default();
            bulk.message = ResponseMessage::new(format!(
                "All entries were successfully deleted ({})",
                no_db.len()
            ));
            (Vec::new(), bulk)
        } else {
            self.inner.api.delete_entries(&remote).await?
        };

        for id in &no_db {
            deleted.push(*id);
            bulk.response_data.push(BulkData {
                status: BulkStatus::Deleted,
                status_code: 200,
                data: *id,
                error: None,
            });
        }

        if !deleted.is_empty() {
            self.inner.entries.remove_all(&deleted);
            self.notify_entries(deleted.clone(), vec![], vec![]);
        }

        Ok((deleted, bulk))
    }

    /// Delete all entries matching a filter on the server and mirror
    /// the deletions locally.
    pub async fn delete_entries_filtered(
        &self,
        filter: &EntryFilter,
    ) -> Result<EntryDeleteFiltered, Error> {
        let result = self.inner.api.delete_entries_filtered(filter).await?;

        if !result.ids.is_empty() {
            self.inner.entries.remove_all(&result.ids);
            self.notify_entries(result.ids.clone(), vec![], vec![]);
        }

        Ok(result)
    }

    /// Register an entry as executed on the server. Only meaningful for
    /// `execute_always` attributes.
    pub async fn mark_entry_executed(&self, id: i64) -> Result<(), Error> {
        self.inner.api.mark_entry_executed(id).await
    }

    /// Fetch a change set from the server, bypassing the cache.
    pub async fn get_update(&self, request: &UpdateRequest) -> Result<Update, Error> {
        self.inner.api.get_update(request).await
    }

    // ── Merge helpers ────────────────────────────────────────────────

    /// Insert newly created entries into the cache and notify.
    fn merge_touched(&self, created: Vec<Entry>) -> Vec<Arc<Entry>> {
        if created.is_empty() {
            return Vec::new();
        }

        self.inner.entries.link_slice(&created);
        let arcs: Vec<Arc<Entry>> = created.into_iter().map(Arc::new).collect();
        self.inner.entries.add_sorted(arcs.iter().cloned());

        self.notify_entries(
            vec![],
            vec![],
            arcs.iter().map(|e| (**e).clone()).collect(),
        );
        arcs
    }

    /// Replace updated entries in the cache and notify.
    fn merge_replaced(&self, updated: Vec<Entry>) -> Vec<Arc<Entry>> {
        if updated.is_empty() {
            return Vec::new();
        }

        let ids: Vec<i64> = updated.iter().map(|e| e.id).collect();
        self.inner.entries.remove_all(&ids);
        self.inner.entries.link_slice(&updated);
        let arcs: Vec<Arc<Entry>> = updated.into_iter().map(Arc::new).collect();
        self.inner.entries.add_sorted(arcs.iter().cloned());

        self.notify_entries(
            vec![],
            arcs.iter().map(|e| (**e).clone()).collect(),
            vec![],
        );
        arcs
    }

    fn notify_entries(&self, deleted: Vec<i64>, updated: Vec<Entry>, created: Vec<Entry>) {
        self.inner
            .bus
            .notify(Some(&Update::with_entries(deleted, updated, created)));
    }

    // ── Socket message handling ──────────────────────────────────────

    /// Entry point for every message received over the socket.
    fn handle_socket_message(&self, message: SocketMessage) {
        match message {
            SocketMessage::Update { update } => {
                debug!(%update, "received update");

                self.inner
                    .bus
                    .set_version(update.version, update.version_date);

                if update.attribute.is_update() {
                    self.inner.attributes.apply_update(&update.attribute);
                    // Entries may reference replaced or deleted
                    // attributes now.
                    self.inner.entries.link_all();
                }
                if update.entry.is_update() {
                    self.run_delete_hooks(&update.entry);
                    self.inner.entries.apply_update(&update.entry);
                }

                // The open message of the socket may carry no change.
                if update.entry.is_update() || update.attribute.is_update() {
                    self.inner.bus.notify(Some(&update));
                }
            }

            SocketMessage::ExecResponse { exec_response } => {
                self.inner.entries.link(&exec_response);

                // The callback is synchronous and allowed to block, so
                // it must stay off the socket read task.
                let scheduler = Arc::clone(&self.inner.scheduler);
                let socket = Arc::clone(&self.inner.socket);
                tokio::spawn(async move {
                    let response = tokio::task::spawn_blocking(move || {
                        scheduler.execute_exec_response(&exec_response)
                    })
                    .await;

                    match response {
                        Ok(Some(response)) => socket.send_execution_response(response).await,
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "execution response callback failed"),
                    }
                });
            }

            SocketMessage::NoDb { no_db, update } => {
                self.inner.entries.link_slice(&no_db);
                self.inner
                    .entries
                    .add_sorted(no_db.into_iter().map(Arc::new));

                self.inner.bus.notify(Some(&update));
            }

            SocketMessage::Unknown => {
                debug!("ignoring socket message of unknown type");
            }
        }
    }

    /// Fire the delete hook for remotely deleted entries this process
    /// still knows: preferably with the cached instance, otherwise with
    /// the snapshot the server sent along.
    fn run_delete_hooks(&self, delta: &UpdateData<Entry>) {
        for id in &delta.deleted {
            if let Some(cached) = self.inner.entries.get(*id) {
                if !cached.was_executed() {
                    self.inner.scheduler.execute_delete(&cached);
                }
            } else if let Some(snapshot) = delta.deleted_pre.iter().find(|e| e.id == *id) {
                self.inner.entries.link(snapshot);
                self.inner.scheduler.execute_delete(snapshot);
            }
        }
    }
}
