//! Shared data-layer context and application store wiring.
//!
//! [`DataContext`] owns the connection manager, the query cache, and the
//! request deduplicator; every store borrows them from here instead of
//! reaching for globals, so tests can stand up isolated contexts side by
//! side.

use std::sync::Arc;

use shepherd_core::{
    Backend, CheckIn, ConfigError, Contact, DataLayerConfig, DataResult, Entity, Journey,
    PrayerRequest,
};

use crate::cache::QueryCache;
use crate::connection::ConnectionManager;
use crate::dedupe::RequestDeduplicator;
use crate::store::EntityStore;

/// The shared plumbing behind every store.
pub struct DataContext {
    config: DataLayerConfig,
    connection: ConnectionManager,
    cache: Arc<QueryCache>,
    single_flight: Arc<RequestDeduplicator>,
}

impl DataContext {
    /// Validate `config` and assemble the context around `backend`.
    ///
    /// The backend is not probed here; call [`DataContext::initialize`] to
    /// establish the session.
    pub fn new(
        backend: Arc<dyn Backend>,
        config: DataLayerConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let single_flight = Arc::new(RequestDeduplicator::new());
        let cache = Arc::new(QueryCache::new(&config, Arc::clone(&single_flight)));
        let connection = ConnectionManager::new(backend, config.clone());
        Ok(Arc::new(Self {
            config,
            connection,
            cache,
            single_flight,
        }))
    }

    /// Establish the backend session, retrying per the configured backoff
    /// policy. Idempotent.
    pub async fn initialize(&self) -> DataResult<()> {
        self.connection.initialize().await.map(|_| ())
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn single_flight(&self) -> &Arc<RequestDeduplicator> {
        &self.single_flight
    }

    pub fn config(&self) -> &DataLayerConfig {
        &self.config
    }

    /// Construct a typed store bound to this context.
    pub fn store<T: Entity>(self: &Arc<Self>) -> Arc<EntityStore<T>> {
        EntityStore::new(Arc::clone(self))
    }
}

pub type ContactStore = Arc<EntityStore<Contact>>;
pub type JourneyStore = Arc<EntityStore<Journey>>;
pub type CheckInStore = Arc<EntityStore<CheckIn>>;
pub type PrayerRequestStore = Arc<EntityStore<PrayerRequest>>;

/// The application's typed stores, wired with their declared cross-store
/// dependencies.
pub struct AppStores {
    pub contacts: ContactStore,
    pub journeys: JourneyStore,
    pub check_ins: CheckInStore,
    pub prayer_requests: PrayerRequestStore,
}

impl AppStores {
    pub fn new(ctx: &Arc<DataContext>) -> Self {
        let contacts = ctx.store::<Contact>();
        let journeys = ctx.store::<Journey>();
        let check_ins = ctx.store::<CheckIn>();
        let prayer_requests = ctx.store::<PrayerRequest>();

        // Journeys denormalize per-stage contact counts, so any contact
        // write can change them. Check-ins denormalize last_check_in onto
        // the contact.
        contacts.with_dependent(journeys.clone());
        check_ins.with_dependent(contacts.clone());

        Self {
            contacts,
            journeys,
            check_ins,
            prayer_requests,
        }
    }
}
