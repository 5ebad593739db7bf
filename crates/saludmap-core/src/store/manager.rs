use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::StorageError;
use crate::geo::haversine_m;
use crate::models::{
    now_millis, CacheEntry, CachedPlace, Coordinates, LocationFix, Partition, Place, SavedLocation,
    MAX_DESCRIPTION_LENGTH, MAX_NAME_LENGTH,
};

/// Default radius for proximity reads of the place cache.
pub const DEFAULT_NEARBY_RADIUS_M: f64 = 5000.0;

/// Tiles and static assets older than this are evicted by `clean_old_tiles`.
pub const DEFAULT_TILE_MAX_AGE_DAYS: i64 = 7;

/// Cached API responses older than this are evicted by `clean_old_api_responses`.
pub const DEFAULT_API_MAX_AGE_DAYS: i64 = 30;

/// Number of past fixes kept in the location history.
const LOCATION_HISTORY_LIMIT: usize = 100;

const LOCATIONS_FILE: &str = "locations";
const SAVED_LOCATIONS_FILE: &str = "saved_locations";
const PLACES_FILE: &str = "places";
const RESOURCES_DIR: &str = "resources";
const ENTRY_EXTENSION: &str = "entry";

/// On-disk envelope for the JSON record families.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredData<T> {
    data: T,
    updated_at: DateTime<Utc>,
}

/// First line of a resource entry file; the payload bytes follow the newline.
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: String,
    partition: Partition,
    content_type: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub tiles: usize,
    pub api: usize,
    pub static_assets: usize,
    pub places: usize,
    pub saved_locations: usize,
}

/// File-backed store shared by every component.
///
/// Each JSON record family has its own lock so that read-modify-write
/// sequences on it are linearizable. Resource entries need no lock: each
/// lives in its own file and is replaced or removed atomically.
pub struct DurableStore {
    root: PathBuf,
    locations_lock: RwLock<()>,
    saved_lock: RwLock<()>,
    places_lock: RwLock<()>,
}

impl DurableStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self {
            root: root.into(),
            locations_lock: RwLock::new(()),
            saved_lock: RwLock::new(()),
            places_lock: RwLock::new(()),
        };
        store.ensure_partitions().await?;
        info!(root = %store.root.display(), "Durable store opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the resource partition directories. Safe to call repeatedly.
    pub async fn ensure_partitions(&self) -> Result<(), StorageError> {
        for partition in Partition::ALL {
            let dir = self.partition_dir(partition);
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::from_io("Failed to create store directory", e))?;
        }
        Ok(())
    }

    fn json_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.root.join(RESOURCES_DIR).join(partition.dir_name())
    }

    fn entry_path(&self, partition: Partition, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.partition_dir(partition)
            .join(format!("{}.{}", name, ENTRY_EXTENSION))
    }

    async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StorageError> {
        let path = self.json_path(name);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from_io(&format!("Failed to read {}", name), e)),
        };

        let stored: StoredData<T> =
            serde_json::from_slice(&contents).map_err(|e| StorageError::corrupt(name, e))?;
        Ok(Some(stored.data))
    }

    async fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<(), StorageError> {
        let stored = StoredData {
            data,
            updated_at: Utc::now(),
        };
        let contents = serde_json::to_vec_pretty(&stored)
            .map_err(|e| StorageError::InvalidRecord(format!("{}: {}", name, e)))?;
        write_atomic(&self.json_path(name), &contents).await
    }

    // ===== Location History =====

    /// Append a fix to the history. The newest fix is the "current" slot.
    pub async fn save_location(&self, fix: &LocationFix) -> Result<(), StorageError> {
        let _guard = self.locations_lock.write().await;
        let mut history: Vec<LocationFix> = self.load(LOCATIONS_FILE).await?.unwrap_or_default();
        history.push(fix.clone());
        if history.len() > LOCATION_HISTORY_LIMIT {
            let excess = history.len() - LOCATION_HISTORY_LIMIT;
            history.drain(..excess);
        }
        self.save(LOCATIONS_FILE, &history).await?;
        debug!(source = ?fix.source, lat = fix.lat, lng = fix.lng, "Location saved");
        Ok(())
    }

    pub async fn get_last_location(&self) -> Result<Option<LocationFix>, StorageError> {
        let _guard = self.locations_lock.read().await;
        let history: Option<Vec<LocationFix>> = self.load(LOCATIONS_FILE).await?;
        Ok(history.and_then(|h| h.last().cloned()))
    }

    /// Stall location writers until the guard is dropped.
    #[cfg(test)]
    pub(crate) async fn lock_locations(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.locations_lock.write().await
    }

    /// Retained fixes, oldest first.
    pub async fn location_history(&self) -> Result<Vec<LocationFix>, StorageError> {
        let _guard = self.locations_lock.read().await;
        Ok(self.load(LOCATIONS_FILE).await?.unwrap_or_default())
    }

    // ===== Saved Locations =====

    /// Save a named location. Name and description are trimmed; an empty
    /// description is stored as none.
    pub async fn save_named_location(
        &self,
        name: &str,
        lat: f64,
        lng: f64,
        description: Option<&str>,
    ) -> Result<SavedLocation, StorageError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::InvalidRecord("Name is required".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(StorageError::InvalidRecord(format!(
                "Name must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }
        let description = description.map(str::trim).filter(|d| !d.is_empty());
        if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LENGTH) {
            return Err(StorageError::InvalidRecord(format!(
                "Description must be at most {} characters",
                MAX_DESCRIPTION_LENGTH
            )));
        }
        if !Coordinates::new(lat, lng).is_valid() {
            return Err(StorageError::InvalidRecord(format!(
                "Invalid coordinates: {}, {}",
                lat, lng
            )));
        }

        let saved = SavedLocation {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            lat,
            lng,
            timestamp: now_millis(),
        };

        let _guard = self.saved_lock.write().await;
        let mut all: Vec<SavedLocation> = self.load(SAVED_LOCATIONS_FILE).await?.unwrap_or_default();
        all.push(saved.clone());
        self.save(SAVED_LOCATIONS_FILE, &all).await?;
        info!(id = %saved.id, name = %saved.name, "Saved named location");
        Ok(saved)
    }

    /// All saved locations in insertion order (oldest first).
    pub async fn get_saved_locations(&self) -> Result<Vec<SavedLocation>, StorageError> {
        let _guard = self.saved_lock.read().await;
        Ok(self.load(SAVED_LOCATIONS_FILE).await?.unwrap_or_default())
    }

    /// Delete a saved location. Returns `false` if no location had that id.
    pub async fn delete_saved_location(&self, id: Uuid) -> Result<bool, StorageError> {
        let _guard = self.saved_lock.write().await;
        let mut all: Vec<SavedLocation> = self.load(SAVED_LOCATIONS_FILE).await?.unwrap_or_default();
        let before = all.len();
        all.retain(|s| s.id != id);
        if all.len() == before {
            return Ok(false);
        }
        self.save(SAVED_LOCATIONS_FILE, &all).await?;
        info!(id = %id, "Deleted saved location");
        Ok(true)
    }

    // ===== Cached Places =====

    /// Upsert places by id, stamping each with a fresh `saved_at`.
    pub async fn save_places(&self, places: &[Place]) -> Result<Vec<CachedPlace>, StorageError> {
        let now = Utc::now();
        let saved: Vec<CachedPlace> = places
            .iter()
            .map(|p| CachedPlace::new(p.clone(), now))
            .collect();

        let _guard = self.places_lock.write().await;
        let mut all: BTreeMap<String, CachedPlace> =
            self.load(PLACES_FILE).await?.unwrap_or_default();
        for place in &saved {
            all.insert(place.place.id.clone(), place.clone());
        }
        self.save(PLACES_FILE, &all).await?;
        debug!(count = saved.len(), total = all.len(), "Places saved");
        Ok(saved)
    }

    /// Cached places within `radius_m` (haversine, inclusive) of `center`,
    /// nearest first. Empty when nothing matches or nothing is cached.
    pub async fn get_nearby_places(
        &self,
        center: Coordinates,
        radius_m: f64,
    ) -> Result<Vec<CachedPlace>, StorageError> {
        let all: BTreeMap<String, CachedPlace> = {
            let _guard = self.places_lock.read().await;
            self.load(PLACES_FILE).await?.unwrap_or_default()
        };

        let mut nearby: Vec<(f64, CachedPlace)> = all
            .into_values()
            .filter_map(|p| {
                let distance = haversine_m(center, p.place.coordinates());
                (distance <= radius_m).then_some((distance, p))
            })
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(nearby.into_iter().map(|(_, p)| p).collect())
    }

    // ===== Resource Cache =====

    /// Write a resource entry, replacing any previous entry for the same key.
    pub async fn put_resource(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let header = EntryHeader {
            key: entry.key.clone(),
            partition: entry.partition,
            content_type: entry.content_type.clone(),
            stored_at: entry.stored_at,
        };
        let mut contents = serde_json::to_vec(&header)
            .map_err(|e| StorageError::InvalidRecord(format!("{}: {}", entry.key, e)))?;
        contents.push(b'\n');
        contents.extend_from_slice(&entry.payload);

        write_atomic(&self.entry_path(entry.partition, &entry.key), &contents).await?;
        debug!(partition = entry.partition.dir_name(), key = %entry.key, bytes = entry.payload.len(), "Resource cached");
        Ok(())
    }

    pub async fn get_resource(
        &self,
        partition: Partition,
        key: &str,
    ) -> Result<Option<CacheEntry>, StorageError> {
        let path = self.entry_path(partition, key);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from_io("Failed to read cached resource", e)),
        };

        let split = contents
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StorageError::corrupt(key, "missing entry header"))?;
        let header: EntryHeader = serde_json::from_slice(&contents[..split])
            .map_err(|e| StorageError::corrupt(key, e))?;
        if header.key != key {
            return Err(StorageError::corrupt(key, "entry key mismatch"));
        }

        Ok(Some(CacheEntry {
            key: header.key,
            partition: header.partition,
            content_type: header.content_type,
            stored_at: header.stored_at,
            payload: contents[split + 1..].to_vec(),
        }))
    }

    /// Remove tile and static entries older than `max_age`. An entry whose
    /// age equals `max_age` exactly is kept. Returns the number removed.
    pub async fn clean_old_tiles(&self, max_age: Duration) -> Result<usize, StorageError> {
        self.clean_old_tiles_at(now_millis(), max_age).await
    }

    pub(crate) async fn clean_old_tiles_at(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<usize, StorageError> {
        let mut removed = 0;
        for partition in Partition::ALL.into_iter().filter(Partition::is_evictable) {
            removed += self.evict_partition(partition, now, max_age).await?;
        }
        info!(removed, "Old tiles cleaned");
        Ok(removed)
    }

    /// Remove cached API responses older than `max_age`, with the same
    /// boundary as `clean_old_tiles`.
    pub async fn clean_old_api_responses(&self, max_age: Duration) -> Result<usize, StorageError> {
        self.clean_old_api_responses_at(now_millis(), max_age).await
    }

    pub(crate) async fn clean_old_api_responses_at(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<usize, StorageError> {
        let removed = self.evict_partition(Partition::Api, now, max_age).await?;
        info!(removed, "Old API responses cleaned");
        Ok(removed)
    }

    async fn evict_partition(
        &self,
        partition: Partition,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<usize, StorageError> {
        let mut removed = 0;
        for path in self.entry_files(partition).await? {
            let expired = match read_entry_header(&path).await {
                // Stored timestamps only carry milliseconds
                Ok(Some(header)) => {
                    (now - header.stored_at).num_milliseconds() > max_age.num_milliseconds()
                }
                // Removed by a concurrent writer or cleaner
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Evicting unreadable cache entry");
                    true
                }
            };

            if expired {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to evict cache entry")
                    }
                }
            }
        }
        Ok(removed)
    }

    async fn entry_files(&self, partition: Partition) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.partition_dir(partition);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from_io("Failed to list cache partition", e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io("Failed to list cache partition", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    // ===== Statistics =====

    pub async fn cache_stats(&self) -> Result<CacheStats, StorageError> {
        let places = {
            let _guard = self.places_lock.read().await;
            self.load::<BTreeMap<String, CachedPlace>>(PLACES_FILE)
                .await?
                .map(|p| p.len())
                .unwrap_or(0)
        };

        Ok(CacheStats {
            tiles: self.entry_files(Partition::Tiles).await?.len(),
            api: self.entry_files(Partition::Api).await?.len(),
            static_assets: self.entry_files(Partition::Static).await?.len(),
            places,
            saved_locations: self.get_saved_locations().await?.len(),
        })
    }
}

/// Write `contents` to a unique temporary sibling, flush it to disk, then
/// rename it over `path`.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    if let Err(e) = write_and_rename(&tmp, path, contents).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::from_io(
            &format!("Failed to write {}", path.display()),
            e,
        ));
    }
    Ok(())
}

async fn write_and_rename(tmp: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, path).await
}

/// Read only the header line of an entry file. `Ok(None)` if the file is gone.
async fn read_entry_header(path: &Path) -> Result<Option<EntryHeader>, StorageError> {
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::from_io("Failed to open cached resource", e)),
    };

    let mut line = Vec::new();
    BufReader::new(file)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| StorageError::from_io("Failed to read cached resource", e))?;

    let name = path.display().to_string();
    let header = serde_json::from_slice(line.strip_suffix(b"\n").unwrap_or(&line))
        .map_err(|e| StorageError::corrupt(&name, e))?;
    Ok(Some(header))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FixSource, PlaceType};
    use std::sync::Arc;

    async fn temp_store() -> (tempfile::TempDir, DurableStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    fn place(id: &str, lat: f64, lng: f64) -> Place {
        Place {
            id: id.to_string(),
            lat,
            lng,
            place_type: PlaceType::Hospital,
            name: Some(id.to_string()),
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_last_location_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DurableStore::open(dir.path()).await.unwrap();
            assert_eq!(store.get_last_location().await.unwrap(), None);
            store.save_location(&LocationFix::gps(1.0, 1.0, Some(5.0))).await.unwrap();
            store.save_location(&LocationFix::manual(2.0, 2.0)).await.unwrap();
        }

        let reopened = DurableStore::open(dir.path()).await.unwrap();
        let last = reopened.get_last_location().await.unwrap().unwrap();
        assert_eq!(last.source, FixSource::Manual);
        assert_eq!(last.lat, 2.0);
        assert_eq!(reopened.location_history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_location_history_is_bounded() {
        let (_dir, store) = temp_store().await;
        for i in 0..(LOCATION_HISTORY_LIMIT + 5) {
            store.save_location(&LocationFix::gps(i as f64 / 1000.0, 0.0, None)).await.unwrap();
        }
        let history = store.location_history().await.unwrap();
        assert_eq!(history.len(), LOCATION_HISTORY_LIMIT);
        assert_eq!(history[0].lat, 5.0 / 1000.0);
    }

    #[tokio::test]
    async fn test_saved_locations_crud_in_insertion_order() {
        let (_dir, store) = temp_store().await;
        let home = store.save_named_location("  Home ", -34.6, -58.38, Some("  ")).await.unwrap();
        let work = store.save_named_location("Work", -34.61, -58.37, Some("Office")).await.unwrap();

        assert_eq!(home.name, "Home");
        assert_eq!(home.description, None);

        let all = store.get_saved_locations().await.unwrap();
        assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![home.id, work.id]);

        assert_eq!(all[0], home);

        assert!(store.delete_saved_location(home.id).await.unwrap());
        assert!(!store.delete_saved_location(home.id).await.unwrap());
        assert_eq!(store.get_saved_locations().await.unwrap(), vec![work]);
    }

    #[tokio::test]
    async fn test_saved_location_validation() {
        let (_dir, store) = temp_store().await;
        let long_name = "x".repeat(MAX_NAME_LENGTH + 1);
        let long_desc = "y".repeat(MAX_DESCRIPTION_LENGTH + 1);

        assert!(matches!(
            store.save_named_location("   ", 0.0, 0.0, None).await,
            Err(StorageError::InvalidRecord(_))
        ));
        assert!(matches!(
            store.save_named_location(&long_name, 0.0, 0.0, None).await,
            Err(StorageError::InvalidRecord(_))
        ));
        assert!(matches!(
            store.save_named_location("ok", 0.0, 0.0, Some(&long_desc)).await,
            Err(StorageError::InvalidRecord(_))
        ));
        assert!(store
            .save_named_location(&"n".repeat(MAX_NAME_LENGTH), 0.0, 0.0, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_save_places_upserts_by_id() {
        let (_dir, store) = temp_store().await;
        let first = store.save_places(&[place("a", 0.0, 0.0)]).await.unwrap();
        let mut moved = place("a", 0.001, 0.0);
        moved.name = Some("renamed".to_string());
        let second = store.save_places(&[moved]).await.unwrap();

        assert!(second[0].saved_at >= first[0].saved_at);
        let nearby = store.get_nearby_places(Coordinates::new(0.0, 0.0), 1000.0).await.unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].place.name.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn test_nearby_places_filters_by_haversine_radius() {
        let (_dir, store) = temp_store().await;
        let center = Coordinates::new(-34.60, -58.38);
        assert!(store.get_nearby_places(center, 1000.0).await.unwrap().is_empty());

        store
            .save_places(&[
                place("exact", -34.60, -58.38),
                // ~111 m north
                place("near", -34.599, -58.38),
                // ~11 km north
                place("far", -34.50, -58.38),
            ])
            .await
            .unwrap();

        let ids = |places: Vec<CachedPlace>| places.into_iter().map(|p| p.place.id).collect::<Vec<_>>();
        assert_eq!(ids(store.get_nearby_places(center, 0.0).await.unwrap()), vec!["exact"]);
        assert_eq!(ids(store.get_nearby_places(center, 500.0).await.unwrap()), vec!["exact", "near"]);
        assert_eq!(ids(store.get_nearby_places(center, 20_000.0).await.unwrap()).len(), 3);
        assert!(store
            .get_nearby_places(Coordinates::new(10.0, 10.0), 0.0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_resource_round_trip_keeps_binary_payload() {
        let (_dir, store) = temp_store().await;
        let payload = vec![0u8, b'\n', 255, 10, 13];
        let entry = CacheEntry::new("https://a.tile.openstreetmap.org/15/1/2.png", Partition::Tiles, Some("image/png".into()), payload.clone());
        store.put_resource(&entry).await.unwrap();

        let loaded = store.get_resource(Partition::Tiles, &entry.key).await.unwrap().unwrap();
        assert_eq!(loaded.payload, payload);
        assert_eq!(loaded.content_type.as_deref(), Some("image/png"));
        assert!(store.get_resource(Partition::Api, &entry.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_old_tiles_keeps_entries_at_threshold() {
        let (_dir, store) = temp_store().await;
        let now = Utc::now();
        let max_age = Duration::days(DEFAULT_TILE_MAX_AGE_DAYS);

        let put = |key: &str, partition: Partition, age: Duration| {
            let mut entry = CacheEntry::new(key, partition, None, vec![1, 2, 3]);
            entry.stored_at = now - age;
            entry
        };
        let old_tile = put("old-tile", Partition::Tiles, max_age + Duration::milliseconds(1));
        let edge_tile = put("edge-tile", Partition::Tiles, max_age);
        let fresh_tile = put("fresh-tile", Partition::Tiles, Duration::minutes(5));
        let old_static = put("old-static", Partition::Static, max_age * 2);
        let old_api = put("old-api", Partition::Api, max_age * 2);
        for entry in [&old_tile, &edge_tile, &fresh_tile, &old_static, &old_api] {
            store.put_resource(entry).await.unwrap();
        }

        let removed = store.clean_old_tiles_at(now, max_age).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_resource(Partition::Tiles, "old-tile").await.unwrap().is_none());
        assert!(store.get_resource(Partition::Tiles, "edge-tile").await.unwrap().is_some());
        assert!(store.get_resource(Partition::Tiles, "fresh-tile").await.unwrap().is_some());
        assert!(store.get_resource(Partition::Static, "old-static").await.unwrap().is_none());
        // API responses are not subject to tile eviction
        assert!(store.get_resource(Partition::Api, "old-api").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clean_old_tiles_boundary_survives_round_trip() {
        let (_dir, store) = temp_store().await;
        let max_age = Duration::days(DEFAULT_TILE_MAX_AGE_DAYS);
        let entry = CacheEntry::new("tile", Partition::Tiles, None, vec![7]);
        store.put_resource(&entry).await.unwrap();

        let loaded = store.get_resource(Partition::Tiles, "tile").await.unwrap().unwrap();
        assert_eq!(loaded, entry);

        let at_threshold = entry.stored_at + max_age + Duration::nanoseconds(999_999);
        assert_eq!(store.clean_old_tiles_at(at_threshold, max_age).await.unwrap(), 0);
        let past_threshold = entry.stored_at + max_age + Duration::milliseconds(1);
        assert_eq!(store.clean_old_tiles_at(past_threshold, max_age).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clean_old_api_responses_only_touches_api_partition() {
        let (_dir, store) = temp_store().await;
        let now = now_millis();
        let max_age = Duration::days(DEFAULT_API_MAX_AGE_DAYS);

        let aged = |key: &str, partition: Partition, age: Duration| {
            let mut entry = CacheEntry::new(key, partition, None, b"[]".to_vec());
            entry.stored_at = now - age;
            entry
        };
        for entry in [
            aged("http://api.test/places?lat=1", Partition::Api, max_age + Duration::days(1)),
            aged("http://api.test/places?lat=2", Partition::Api, max_age),
            aged("http://api.test/places?lat=3", Partition::Api, Duration::hours(1)),
            aged("old-tile", Partition::Tiles, max_age * 2),
        ] {
            store.put_resource(&entry).await.unwrap();
        }

        assert_eq!(store.clean_old_api_responses_at(now, max_age).await.unwrap(), 1);
        let stats = store.cache_stats().await.unwrap();
        assert_eq!(stats.api, 2);
        assert_eq!(stats.tiles, 1);
        assert!(store.get_resource(Partition::Api, "http://api.test/places?lat=1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_file_named_by_url_digest() {
        let (_dir, store) = temp_store().await;
        let path = store.entry_path(Partition::Tiles, "abc");
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad.entry"
        );
    }

    #[tokio::test]
    async fn test_concurrent_place_writes_and_reads_do_not_corrupt() {
        let (_dir, store) = temp_store().await;
        let store = Arc::new(store);
        let center = Coordinates::new(0.0, 0.0);

        let mut tasks = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.save_places(&[place(&format!("p{}", i), 0.0, i as f64 / 10_000.0)]).await.unwrap();
                store.get_nearby_places(center, 5000.0).await.unwrap().len()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap() >= 1);
        }
        assert_eq!(store.get_nearby_places(center, 5000.0).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_corrupt_places_file_reports_corrupt() {
        let (dir, store) = temp_store().await;
        std::fs::write(dir.path().join("places.json"), b"{not json").unwrap();
        let err = store.get_nearby_places(Coordinates::new(0.0, 0.0), 10.0).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
