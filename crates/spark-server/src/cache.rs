//! Room cache: ordered map of room id to hydrated room.
//!
//! Reads take the map's read lock and never block each other. Every mutation
//! (`put`, `invalidate`, `reload`, hydration insert) takes the `pending` lock
//! and then the write lock, so a reader sees either the old map or the new
//! one, never a partial reload.
//!
//! A miss starts at most one remote fetch per key. Later callers for the same
//! key await the same shared future and get the same room or the same error.
//! Failures are never cached.
//!
//! `reload` lists without holding any lock. Keys mutated while the listing is
//! outstanding keep their current state when the new map is swapped in.
//!
//! Lock order: `pending` before `rooms`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use spark_contracts::{ApiResource, ResourceId, RoomRecord, SparkResult};
use spark_kernel::Room;
use tracing::{debug, info, warn};

use crate::api::{decode, SparkApi};

type Flight = Shared<BoxFuture<'static, SparkResult<Arc<Room>>>>;

#[derive(Clone)]
pub struct RoomCache {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn SparkApi>,
    rooms: RwLock<IndexMap<ResourceId, Arc<Room>>>,
    pending: Mutex<Pending>,
    next_flight: AtomicU64,
}

/// Bookkeeping for work that outlives a single lock hold.
#[derive(Default)]
struct Pending {
    flights: HashMap<ResourceId, (u64, Flight)>,
    generation: u64,
    reloads: usize,
    /// Last mutation generation per key, kept only while a reload runs.
    touched: HashMap<ResourceId, u64>,
}

impl Pending {
    fn touch(&mut self, id: &ResourceId) {
        self.generation += 1;
        if self.reloads > 0 {
            self.touched.insert(id.clone(), self.generation);
        }
    }
}

/// Registers a running reload; dropping it (also on error or cancellation)
/// releases the touched-key log once no reload is left.
struct ReloadTicket {
    inner: Arc<Inner>,
    started: u64,
}

impl ReloadTicket {
    fn begin(inner: Arc<Inner>) -> Self {
        let started = {
            let mut pending = inner.pending.lock();
            pending.reloads += 1;
            pending.generation
        };
        Self { inner, started }
    }
}

impl Drop for ReloadTicket {
    fn drop(&mut self) {
        let mut pending = self.inner.pending.lock();
        pending.reloads -= 1;
        if pending.reloads == 0 {
            pending.touched.clear();
        }
    }
}

impl RoomCache {
    pub fn new(api: Arc<dyn SparkApi>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                rooms: RwLock::new(IndexMap::new()),
                pending: Mutex::new(Pending::default()),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    /// Cached room, or one fetch shared by every concurrent caller for `id`.
    pub async fn get(&self, id: &ResourceId) -> SparkResult<Arc<Room>> {
        if let Some(room) = self.peek(id) {
            debug!(room_id = %id, "room cache hit");
            return Ok(room);
        }
        let flight = {
            let mut pending = self.inner.pending.lock();
            // A flight may have landed between the read above and this lock.
            if let Some(room) = self.peek(id) {
                return Ok(room);
            }
            match pending.flights.get(id) {
                Some((_, flight)) => {
                    debug!(room_id = %id, "room cache miss, joining fetch in flight");
                    flight.clone()
                }
                None => {
                    debug!(room_id = %id, "room cache miss, fetching");
                    let token = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let flight = hydrate(self.inner.clone(), id.clone(), token)
                        .boxed()
                        .shared();
                    pending.flights.insert(id.clone(), (token, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    pub fn peek(&self, id: &ResourceId) -> Option<Arc<Room>> {
        self.inner.rooms.read().get(id).cloned()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.inner.rooms.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.rooms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace. A fetch still in flight for the same id is detached
    /// so it cannot overwrite this entry when it lands.
    pub fn put(&self, room: Room) -> Arc<Room> {
        let room = Arc::new(room);
        let mut pending = self.inner.pending.lock();
        pending.flights.remove(room.id());
        pending.touch(room.id());
        self.inner
            .rooms
            .write()
            .insert(room.id().clone(), room.clone());
        debug!(room_id = %room.id(), "room cached");
        room
    }

    /// Remove `id`; absent ids are a no-op.
    pub fn invalidate(&self, id: &ResourceId) {
        let mut pending = self.inner.pending.lock();
        pending.flights.remove(id);
        pending.touch(id);
        if self.inner.rooms.write().shift_remove(id).is_some() {
            debug!(room_id = %id, "room evicted");
        }
    }

    /// Cached rooms in insertion order. Never touches the remote.
    pub fn list(&self) -> Vec<Arc<Room>> {
        self.inner.rooms.read().values().cloned().collect()
    }

    /// Replace the whole cache with one full listing, in remote order. The new
    /// map is built before the swap; puts and evictions that happened while the
    /// listing was outstanding are replayed onto it.
    pub async fn reload(&self) -> SparkResult<usize> {
        let ticket = ReloadTicket::begin(self.inner.clone());
        let records = self.inner.api.list(ApiResource::Rooms, &[]).await?;
        let mut fresh = IndexMap::with_capacity(records.len());
        for raw in records {
            match decode::<RoomRecord>(raw).and_then(|record| Room::from_record(&record)) {
                Ok(room) => {
                    fresh.insert(room.id().clone(), Arc::new(room));
                }
                Err(err) => warn!(error = %err, "skipping unreadable room in listing"),
            }
        }

        let (count, replayed) = {
            let pending = self.inner.pending.lock();
            let mut rooms = self.inner.rooms.write();
            let mut replayed = 0usize;
            for (id, generation) in &pending.touched {
                if *generation <= ticket.started {
                    continue;
                }
                replayed += 1;
                match rooms.get(id) {
                    Some(room) => {
                        fresh.insert(id.clone(), room.clone());
                    }
                    None => {
                        fresh.shift_remove(id);
                    }
                }
            }
            let count = fresh.len();
            *rooms = fresh;
            (count, replayed)
        };
        drop(ticket);
        info!(rooms = count, replayed, "room cache reloaded");
        Ok(count)
    }
}

async fn fetch_room(api: &dyn SparkApi, id: &ResourceId) -> SparkResult<Room> {
    let record: RoomRecord = decode(api.get(ApiResource::Rooms, id.as_str()).await?)?;
    Room::from_record(&record)
}

async fn hydrate(inner: Arc<Inner>, id: ResourceId, token: u64) -> SparkResult<Arc<Room>> {
    let fetched = fetch_room(inner.api.as_ref(), &id).await;
    let mut pending = inner.pending.lock();
    // Only the flight still registered for `id` may insert; an invalidate or
    // put in the meantime detached it.
    let current = matches!(pending.flights.get(&id), Some((t, _)) if *t == token);
    if current {
        pending.flights.remove(&id);
    }
    match fetched {
        Ok(room) => {
            let room = Arc::new(room);
            if current {
                pending.touch(&id);
                inner.rooms.write().insert(id, room.clone());
            }
            Ok(room)
        }
        Err(err) => {
            warn!(room_id = %id, error = %err, "room hydration failed");
            Err(err)
        }
    }
}
