//! Redb-backed durable room store.
//!
//! Room records, their permitted peers and the expiration index live in the
//! same database and every change to them is made in a single write
//! transaction. A transaction dropped before `commit` is rolled back by redb.

use std::{
    path::Path,
    sync::{PoisonError, RwLock},
};

use redb::{
    Database, MultimapTable, MultimapTableDefinition, ReadableMultimapTable, ReadableTable,
    Table, TableDefinition, WriteTransaction,
};

use crate::{
    domain::{Room, RoomStore, StoreError, TemporaryRoomStore},
    infrastructure::dto::storage::StoredRoom,
};

/// Table: rooms
/// Key: room id
/// Value: JSON-encoded `StoredRoom` (id and variant timing fields)
const ROOMS: TableDefinition<&str, &[u8]> = TableDefinition::new("rooms");

/// Multimap: room_peers
/// Key: room id
/// Values: permitted peer ids (none means everyone is permitted)
const ROOM_PEERS: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("room_peers");

/// Multimap: expirations
/// Key: valid_until (8 bytes, see `encode_expiry`)
/// Values: ids of the rooms expiring at that second
///
/// Keys sort by expiry, so iterating from the start visits rooms in the order
/// they expire. A key disappears with its last room.
const EXPIRATIONS: MultimapTableDefinition<&[u8], &str> =
    MultimapTableDefinition::new("expirations");

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn corrupted(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupted(e.to_string())
}

fn missing_record(id: &str) -> StoreError {
    StoreError::Corrupted(format!("expiration entry for missing room '{}'", id))
}

/// The three tables opened inside one write transaction.
struct Tables<'txn> {
    rooms: Table<'txn, &'static str, &'static [u8]>,
    peers: MultimapTable<'txn, &'static str, &'static str>,
    expirations: MultimapTable<'txn, &'static [u8], &'static str>,
}

impl<'txn> Tables<'txn> {
    fn open(txn: &'txn WriteTransaction) -> Result<Self, StoreError> {
        Ok(Self {
            rooms: txn.open_table(ROOMS).map_err(backend)?,
            peers: txn.open_multimap_table(ROOM_PEERS).map_err(backend)?,
            expirations: txn.open_multimap_table(EXPIRATIONS).map_err(backend)?,
        })
    }

    fn load(&self, id: &str) -> Result<Option<Room>, StoreError> {
        load_room(&self.rooms, &self.peers, id)
    }

    fn insert(&mut self, room: &Room) -> Result<(), StoreError> {
        let record = serde_json::to_vec(&StoredRoom::from(room)).map_err(backend)?;
        self.rooms
            .insert(room.id(), record.as_slice())
            .map_err(backend)?;
        for peer in room.allowed_peers() {
            self.peers
                .insert(room.id(), peer.as_str())
                .map_err(backend)?;
        }
        if let Some(until) = room.expires_at() {
            self.expirations
                .insert(encode_expiry(until).as_slice(), room.id())
                .map_err(backend)?;
        }
        Ok(())
    }

    fn delete(&mut self, room: &Room) -> Result<(), StoreError> {
        self.rooms.remove(room.id()).map_err(backend)?;
        self.peers.remove_all(room.id()).map_err(backend)?;
        if let Some(until) = room.expires_at() {
            self.expirations
                .remove(encode_expiry(until).as_slice(), room.id())
                .map_err(backend)?;
        }
        Ok(())
    }

    /// Ids in the expiration index whose key is below `bound`, oldest first.
    fn expiring_before(&self, bound: &[u8]) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in self.expirations.range(..bound).map_err(backend)? {
            let (_, bucket) = entry.map_err(backend)?;
            for id in bucket {
                ids.push(id.map_err(backend)?.value().to_string());
            }
        }
        Ok(ids)
    }

    fn first_expiring(&self) -> Result<Option<String>, StoreError> {
        let Some(entry) = self.expirations.iter().map_err(backend)?.next() else {
            return Ok(None);
        };
        let (_, mut bucket) = entry.map_err(backend)?;
        match bucket.next() {
            Some(id) => Ok(Some(id.map_err(backend)?.value().to_string())),
            None => Ok(None),
        }
    }
}

fn load_room<R, P>(rooms: &R, peers: &P, id: &str) -> Result<Option<Room>, StoreError>
where
    R: ReadableTable<&'static str, &'static [u8]>,
    P: ReadableMultimapTable<&'static str, &'static str>,
{
    let stored: StoredRoom = match rooms.get(id).map_err(backend)? {
        Some(record) => serde_json::from_slice(record.value()).map_err(corrupted)?,
        None => return Ok(None),
    };
    let allowed = peers
        .get(id)
        .map_err(backend)?
        .map(|peer| peer.map(|peer| peer.value().to_string()).map_err(backend))
        .collect::<Result<Vec<_>, StoreError>>()?;
    stored.into_room(allowed).map(Some).map_err(corrupted)
}

/// Durable room store backed by Redb.
///
/// Holds every room variant; only time-window rooms have an index entry.
pub struct RedbRoomStore {
    db: RwLock<Option<Database>>,
}

impl RedbRoomStore {
    /// Open or create a Redb database at the given path and create the tables.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(backend)?;

        let txn = db.begin_write().map_err(backend)?;
        Tables::open(&txn)?;
        txn.commit().map_err(backend)?;

        tracing::info!("Opened room database at {}", path.as_ref().display());
        Ok(Self {
            db: RwLock::new(Some(db)),
        })
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.db.read().unwrap_or_else(PoisonError::into_inner);
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        f(db)
    }

    /// Run `f` against the tables in one write transaction, committing only
    /// when it succeeds.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut Tables<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(backend)?;
            let result = {
                let mut tables = Tables::open(&txn)?;
                f(&mut tables)?
            };
            txn.commit().map_err(backend)?;
            Ok(result)
        })
    }
}

impl RoomStore for RedbRoomStore {
    fn put(&self, room: Room, allow_override: bool) -> Result<(), StoreError> {
        self.write(|tables| {
            if let Some(previous) = tables.load(room.id())? {
                if !allow_override {
                    // dropping the transaction rolls it back
                    return Err(StoreError::AlreadyExists(room.id().to_string()));
                }
                tables.delete(&previous)?;
            }
            tables.insert(&room)
        })
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.write(|tables| match tables.load(id)? {
            Some(room) => {
                tables.delete(&room)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    fn get(&self, id: &str) -> Result<Option<Room>, StoreError> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(backend)?;
            let rooms = txn.open_table(ROOMS).map_err(backend)?;
            let peers = txn.open_multimap_table(ROOM_PEERS).map_err(backend)?;
            load_room(&rooms, &peers, id)
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        let db = self.db.write().unwrap_or_else(PoisonError::into_inner).take();
        if db.is_some() {
            tracing::info!("Closed room database");
        }
        Ok(())
    }
}

impl TemporaryRoomStore for RedbRoomStore {
    /// Removes every room whose `valid_until` is strictly before `now`. A room
    /// is still valid during its last second, so `valid_until == now` stays.
    fn clean_expired(
        &self,
        now: i64,
        on_removed: &mut dyn FnMut(&Room),
    ) -> Result<Option<Room>, StoreError> {
        let removed = self.write(|tables| {
            let mut removed = Vec::new();
            for id in tables.expiring_before(&encode_expiry(now))? {
                let room = tables.load(&id)?.ok_or_else(|| missing_record(&id))?;
                tables.delete(&room)?;
                removed.push(room);
            }
            let next = match tables.first_expiring()? {
                Some(id) => Some(tables.load(&id)?.ok_or_else(|| missing_record(&id))?),
                None => None,
            };
            Ok((removed, next))
        });
        let (removed, next) = removed?;

        for room in &removed {
            tracing::info!("Room '{}' expired", room.id());
            on_removed(room);
        }
        Ok(next)
    }
}

/// Big-endian with the sign bit flipped, so byte order matches numeric order
/// for negative timestamps too.
fn encode_expiry(until: i64) -> [u8; 8] {
    ((until as u64) ^ (1 << 63)).to_be_bytes()
}
