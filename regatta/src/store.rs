//! Race loading and the per-process cache in front of it.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::feed::{
    parse_race_directory, parse_race_file, parse_race_list, RaceFeedFiles, LEADERBOARD_FILE,
    POSITIONS_FILE, RACES_FILE, SETUP_FILE,
};
use crate::{Race, RaceError, RaceInfo};

/// Where races come from.
pub trait RaceSource {
    fn list_races(&self) -> Result<Vec<RaceInfo>, RaceError>;
    fn load_race(&self, race_id: &str) -> Result<Race, RaceError>;
}

fn read_file(path: &Path) -> Result<Vec<u8>, RaceError> {
    fs::read(path).map_err(|source| RaceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, RaceError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RaceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A tracker export: `races.json` at the root and one directory per race.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// A race id names exactly one directory directly under the export root.
fn is_plain_race_id(race_id: &str) -> bool {
    if race_id.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(race_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

impl RaceSource for DirectorySource {
    fn list_races(&self) -> Result<Vec<RaceInfo>, RaceError> {
        let bytes = read_file(&self.root.join(RACES_FILE))?;
        parse_race_list(&bytes)
    }

    fn load_race(&self, race_id: &str) -> Result<Race, RaceError> {
        if !is_plain_race_id(race_id) {
            return Err(RaceError::RaceNotFound(race_id.to_string()));
        }
        let races = read_file(&self.root.join(RACES_FILE))?;
        let dir = self.root.join(race_id);
        if !dir.is_dir() {
            return Err(RaceError::RaceNotFound(race_id.to_string()));
        }
        let setup = read_file(&dir.join(SETUP_FILE))?;
        let positions = read_file(&dir.join(POSITIONS_FILE))?;
        let leaderboard = read_optional(&dir.join(LEADERBOARD_FILE))?;
        parse_race_directory(
            race_id,
            RaceFeedFiles {
                races: &races,
                setup: &setup,
                positions: &positions,
                leaderboard: leaderboard.as_deref(),
            },
        )
    }
}

/// One self-contained race document.
#[derive(Debug, Clone)]
pub struct RaceFileSource {
    path: PathBuf,
}

impl RaceFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Race, RaceError> {
        let bytes = read_file(&self.path)?;
        parse_race_file(&bytes)
    }
}

impl RaceSource for RaceFileSource {
    fn list_races(&self) -> Result<Vec<RaceInfo>, RaceError> {
        Ok(vec![self.load()?.info()])
    }

    fn load_race(&self, race_id: &str) -> Result<Race, RaceError> {
        let race = self.load()?;
        if race.id != race_id {
            return Err(RaceError::RaceNotFound(race_id.to_string()));
        }
        Ok(race)
    }
}

/// Caches loaded races by id for the lifetime of the store.
///
/// Failed loads are not cached, so a later call retries the source.
pub struct RaceStore<S> {
    source: S,
    races: HashMap<String, Arc<Race>>,
}

impl<S: RaceSource> RaceStore<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            races: HashMap::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn list_races(&self) -> Result<Vec<RaceInfo>, RaceError> {
        self.source.list_races()
    }

    /// Listing for display: an unreadable source is logged and shown as empty.
    pub fn races_or_empty(&self) -> Vec<RaceInfo> {
        match self.source.list_races() {
            Ok(races) => races,
            Err(err) => {
                warn!("could not list races: {}", err);
                Vec::new()
            }
        }
    }

    pub fn get(&mut self, race_id: &str) -> Result<Arc<Race>, RaceError> {
        if let Some(race) = self.races.get(race_id) {
            debug!(race = race_id, "race cache hit");
            return Ok(Arc::clone(race));
        }
        let race = Arc::new(self.source.load_race(race_id)?);
        info!(
            race = race_id,
            boats = race.boats.len(),
            fingerprint = %race.fingerprint.get(..12).unwrap_or(&race.fingerprint),
            "race loaded"
        );
        self.races.insert(race_id.to_string(), Arc::clone(&race));
        Ok(race)
    }

    /// Like [`get`](Self::get), but a failure is logged and yields `None`.
    pub fn get_or_none(&mut self, race_id: &str) -> Option<Arc<Race>> {
        match self.get(race_id) {
            Ok(race) => Some(race),
            Err(err) => {
                warn!(race = race_id, "could not load race: {}", err);
                None
            }
        }
    }

    pub fn is_cached(&self, race_id: &str) -> bool {
        self.races.contains_key(race_id)
    }

    pub fn invalidate(&mut self, race_id: &str) -> bool {
        self.races.remove(race_id).is_some()
    }

    pub fn clear(&mut self) {
        self.races.clear();
    }
}
