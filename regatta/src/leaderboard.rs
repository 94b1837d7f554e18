//! Leaderboards: locally ranked by distance sailed, or taken from a tracker
//! feed's precomputed standings.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geo::{distance_m, meters_to_nm};
use crate::metrics::{metrics_at, rank_by_key, BoatMetrics};
use crate::{Boat, FeedStanding, MetricsParams, Race};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoatStatus {
    NotStarted,
    Racing,
    Finished,
    Retired,
}

impl BoatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoatStatus::NotStarted => "not_started",
            BoatStatus::Racing => "racing",
            BoatStatus::Finished => "finished",
            BoatStatus::Retired => "retired",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardSource {
    Computed,
    Feed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub boat_id: String,
    pub name: String,
    pub sail_number: String,
    pub class: String,
    pub color: String,
    pub rank: Option<usize>,
    pub class_rank: Option<usize>,
    pub metrics: BoatMetrics,
    pub dtf_nm: Option<f64>,
    pub status: BoatStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Leaderboard {
    pub race_id: String,
    pub cursor: Option<i64>,
    pub source: LeaderboardSource,
    /// Ranked boats by rank, then unranked boats in roster order.
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn leader(&self) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| e.rank == Some(1))
    }

    pub fn entry(&self, boat_id: &str) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| e.boat_id == boat_id)
    }

    /// Entries grouped by class, each group ordered by class rank.
    pub fn by_class(&self) -> Vec<(String, Vec<&LeaderboardEntry>)> {
        let mut groups: Vec<(String, Vec<&LeaderboardEntry>)> = Vec::new();
        for entry in &self.entries {
            match groups.iter_mut().find(|(class, _)| class == &entry.class) {
                Some((_, members)) => members.push(entry),
                None => groups.push((entry.class.clone(), vec![entry])),
            }
        }
        for (_, members) in &mut groups {
            members.sort_by_key(|e| e.class_rank.unwrap_or(usize::MAX));
        }
        groups
    }
}

fn entry_for(boat: &Boat, metrics: BoatMetrics) -> LeaderboardEntry {
    LeaderboardEntry {
        boat_id: boat.id.clone(),
        name: boat.name.clone(),
        sail_number: boat.sail_number.clone(),
        class: boat.class.clone(),
        color: boat.color.clone(),
        rank: None,
        class_rank: None,
        metrics,
        dtf_nm: None,
        status: BoatStatus::NotStarted,
    }
}

fn local_status(boat: &Boat, metrics: &BoatMetrics, cursor: Option<i64>) -> BoatStatus {
    if !metrics.has_position() {
        return BoatStatus::NotStarted;
    }
    if boat.retired {
        return BoatStatus::Retired;
    }
    let finished = boat
        .finish_time_ms
        .map_or(false, |finish| cursor.map_or(true, |c| finish <= c));
    if finished {
        BoatStatus::Finished
    } else {
        BoatStatus::Racing
    }
}

fn finish_distance_nm(race: &Race, metrics: &BoatMetrics, params: &MetricsParams) -> Option<f64> {
    let course = race.course.as_ref()?;
    let current = metrics.current?;
    Some(meters_to_nm(distance_m(
        current.point(),
        course.finish,
        params.distance_model,
    )))
}

fn sort_entries(entries: &mut [LeaderboardEntry]) {
    entries.sort_by_key(|e| e.rank.unwrap_or(usize::MAX));
}

/// Rank every boat by distance sailed up to `cursor` (whole trace for `None`).
///
/// Boats without a visible sample are `NotStarted`, unranked and listed last.
pub fn compute_leaderboard(race: &Race, cursor: Option<i64>, params: &MetricsParams) -> Leaderboard {
    let metrics: Vec<BoatMetrics> = race
        .boats
        .iter()
        .map(|boat| metrics_at(boat, race.start_ms, cursor, params))
        .collect();
    let ranks = rank_by_key(&metrics, |m| m.has_position().then_some(m.distance_m));

    let mut class_ranks = vec![None; race.boats.len()];
    for class in race.classes() {
        let members: Vec<usize> = race
            .boats
            .iter()
            .enumerate()
            .filter(|(_, b)| b.class == class)
            .map(|(idx, _)| idx)
            .collect();
        let in_class = rank_by_key(&members, |&idx| {
            let m = &metrics[idx];
            m.has_position().then_some(m.distance_m)
        });
        for (idx, rank) in members.into_iter().zip(in_class) {
            class_ranks[idx] = rank;
        }
    }

    let mut entries: Vec<LeaderboardEntry> = race
        .boats
        .iter()
        .zip(metrics)
        .enumerate()
        .map(|(idx, (boat, m))| {
            let status = local_status(boat, &m, cursor);
            let dtf_nm = finish_distance_nm(race, &m, params);
            let mut entry = entry_for(boat, m);
            entry.rank = ranks[idx];
            entry.class_rank = class_ranks[idx];
            entry.status = status;
            entry.dtf_nm = dtf_nm;
            entry
        })
        .collect();
    sort_entries(&mut entries);

    Leaderboard {
        race_id: race.id.clone(),
        cursor,
        source: LeaderboardSource::Computed,
        entries,
    }
}

/// Leaderboard built from the feed's standings. `None` when the race has none.
///
/// The first tag listing a boat supplies its overall rank, DTF and flags; the
/// tag named like the boat's class supplies its class rank.
pub fn feed_leaderboard(race: &Race, cursor: Option<i64>, params: &MetricsParams) -> Option<Leaderboard> {
    if race.standings.is_empty() {
        return None;
    }

    let mut entries: Vec<LeaderboardEntry> = race
        .boats
        .iter()
        .map(|boat| {
            let mut metrics = metrics_at(boat, race.start_ms, cursor, params);
            let rows: Vec<&FeedStanding> = race
                .standings
                .iter()
                .filter(|s| s.boat_id == boat.id)
                .collect();
            let overall = rows.first().copied();
            let class_row = rows
                .iter()
                .find(|s| s.tag.eq_ignore_ascii_case(&boat.class))
                .copied();

            let status = match overall {
                _ if boat.retired => BoatStatus::Retired,
                Some(row) if row.finished => BoatStatus::Finished,
                Some(row) if row.started => BoatStatus::Racing,
                Some(_) => BoatStatus::NotStarted,
                None => local_status(boat, &metrics, cursor),
            };
            if let Some(elapsed) = overall.and_then(|row| row.elapsed_ms) {
                metrics.elapsed_ms = elapsed.max(0);
            }
            let dtf_nm = overall
                .and_then(|row| row.dtf_nm)
                .or_else(|| finish_distance_nm(race, &metrics, params));

            let mut entry = entry_for(boat, metrics);
            entry.rank = overall.and_then(|row| row.rank).map(|r| r as usize);
            entry.class_rank = class_row.and_then(|row| row.rank).map(|r| r as usize);
            entry.status = status;
            entry.dtf_nm = dtf_nm;
            entry
        })
        .collect();
    sort_entries(&mut entries);

    Some(Leaderboard {
        race_id: race.id.clone(),
        cursor,
        source: LeaderboardSource::Feed,
        entries,
    })
}

type MemoKey = (String, String, Option<i64>, String);

/// Single-slot memo over `compute_leaderboard`, keyed by race fingerprint,
/// cursor and parameter hash. Races without a fingerprint, or parameters that
/// cannot be hashed, are always recomputed.
#[derive(Debug, Default)]
pub struct LeaderboardMemo {
    key: Option<MemoKey>,
    value: Option<Leaderboard>,
    hits: u64,
    misses: u64,
}

fn memo_key(race: &Race, cursor: Option<i64>, params: &MetricsParams) -> Option<MemoKey> {
    if race.fingerprint.is_empty() {
        return None;
    }
    match params.params_hash_sha256() {
        Ok(hash) => Some((race.id.clone(), race.fingerprint.clone(), cursor, hash)),
        Err(err) => {
            warn!(race = %race.id, "leaderboard not memoised: {}", err);
            None
        }
    }
}

impl LeaderboardMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        race: &Race,
        cursor: Option<i64>,
        params: &MetricsParams,
    ) -> &Leaderboard {
        let key = memo_key(race, cursor, params);
        self.get_or_compute_keyed(key, race, cursor, params)
    }

    /// `None` never matches, so the value is recomputed and not retained
    /// for later calls.
    fn get_or_compute_keyed(
        &mut self,
        key: Option<MemoKey>,
        race: &Race,
        cursor: Option<i64>,
        params: &MetricsParams,
    ) -> &Leaderboard {
        if key.is_some() && self.value.is_some() && self.key == key {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.value = Some(compute_leaderboard(race, cursor, params));
            self.key = key;
        }
        self.value
            .get_or_insert_with(|| compute_leaderboard(race, cursor, params))
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.value = None;
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
