use crate::batch::BatchSink;
use crate::config::{DUMP_EXTENSIONS, PROGRESS_INTERVAL};
use crate::parser::DumpReader;
use crate::process::{self, Processor};
use crate::stats::{ImportStats, PassStats};
use crate::store::Store;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Import stages, in the order they must run. Each stage reads one dump file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Labels,
    Artists,
    Masters,
    Releases,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Labels, Stage::Artists, Stage::Masters, Stage::Releases];

    /// Family name used in dump file names.
    pub fn family(self) -> &'static str {
        match self {
            Stage::Labels => "labels",
            Stage::Artists => "artists",
            Stage::Masters => "masters",
            Stage::Releases => "releases",
        }
    }

    /// Element tag streamed from this stage's dump.
    pub fn tag(self) -> &'static str {
        match self {
            Stage::Labels => "label",
            Stage::Artists => "artist",
            Stage::Masters => "master",
            Stage::Releases => "release",
        }
    }

    /// Passes of this stage in dependency order.
    pub fn passes(self) -> &'static [Pass] {
        match self {
            Stage::Labels => &[Pass::LabelNames, Pass::ParentLabels, Pass::Sublabels],
            Stage::Artists => &[Pass::ArtistNames, Pass::ArtistAliases, Pass::ArtistGroups],
            Stage::Masters => &[Pass::Masters],
            Stage::Releases => &[Pass::ReleaseNames, Pass::ReleaseArtists, Pass::ReleaseLabels],
        }
    }
}

/// One full read of a dump file applying a single processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pass {
    LabelNames,
    ParentLabels,
    Sublabels,
    ArtistNames,
    ArtistAliases,
    ArtistGroups,
    Masters,
    ReleaseNames,
    ReleaseArtists,
    ReleaseLabels,
}

impl Pass {
    pub fn stage(self) -> Stage {
        match self {
            Pass::LabelNames | Pass::ParentLabels | Pass::Sublabels => Stage::Labels,
            Pass::ArtistNames | Pass::ArtistAliases | Pass::ArtistGroups => Stage::Artists,
            Pass::Masters => Stage::Masters,
            Pass::ReleaseNames | Pass::ReleaseArtists | Pass::ReleaseLabels => Stage::Releases,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Pass::LabelNames => "labels",
            Pass::ParentLabels => "parent labels",
            Pass::Sublabels => "sublabels",
            Pass::ArtistNames => "artists",
            Pass::ArtistAliases => "artist aliases",
            Pass::ArtistGroups => "artist groups",
            Pass::Masters => "masters",
            Pass::ReleaseNames => "releases",
            Pass::ReleaseArtists => "release artists",
            Pass::ReleaseLabels => "release labels",
        }
    }

    pub fn processor(self) -> Processor {
        match self {
            Pass::LabelNames => process::label_names,
            Pass::ParentLabels => process::parent_labels,
            Pass::Sublabels => process::sublabels,
            Pass::ArtistNames => process::artist_names,
            Pass::ArtistAliases => process::artist_aliases,
            Pass::ArtistGroups => process::artist_groups,
            Pass::Masters => process::masters,
            Pass::ReleaseNames => process::release_names,
            Pass::ReleaseArtists => process::release_artists,
            Pass::ReleaseLabels => process::release_labels,
        }
    }
}

/// Which passes a run performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub labels: bool,
    pub parent_labels: bool,
    pub sublabels: bool,
    pub artists: bool,
    pub artist_aliases: bool,
    pub artist_groups: bool,
    pub masters: bool,
    pub releases: bool,
    pub release_artists: bool,
    pub release_labels: bool,
    pub all: bool,
}

impl Selection {
    pub fn everything() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn includes(&self, pass: Pass) -> bool {
        self.all
            || match pass {
                Pass::LabelNames => self.labels,
                Pass::ParentLabels => self.parent_labels,
                Pass::Sublabels => self.sublabels,
                Pass::ArtistNames => self.artists,
                Pass::ArtistAliases => self.artist_aliases,
                Pass::ArtistGroups => self.artist_groups,
                Pass::Masters => self.masters,
                Pass::ReleaseNames => self.releases,
                Pass::ReleaseArtists => self.release_artists,
                Pass::ReleaseLabels => self.release_labels,
            }
    }

    pub fn passes_for(&self, stage: Stage) -> Vec<Pass> {
        stage
            .passes()
            .iter()
            .copied()
            .filter(|p| self.includes(*p))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        Stage::ALL.iter().all(|s| self.passes_for(*s).is_empty())
    }
}

/// Locates `discogs_<date>_<family>.xml` dumps (optionally `.gz`/`.bz2`).
#[derive(Debug, Clone)]
pub struct DumpSet {
    data_dir: PathBuf,
    date: String,
}

impl DumpSet {
    pub fn new(data_dir: impl Into<PathBuf>, date: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            date: date.into(),
        }
    }

    pub fn file_stem(&self, stage: Stage) -> String {
        format!("discogs_{}_{}", self.date, stage.family())
    }

    pub fn locate(&self, stage: Stage) -> Result<PathBuf> {
        let stem = self.file_stem(stage);
        for ext in DUMP_EXTENSIONS {
            let path = self.data_dir.join(format!("{stem}.{ext}"));
            if path.is_file() {
                return Ok(path);
            }
        }
        bail!(
            "Dump file not found for {}: {}.xml[.gz|.bz2] in {}",
            stage.family(),
            stem,
            self.data_dir.display()
        )
    }
}

pub struct ImportConfig {
    pub dumps: DumpSet,
    pub selection: Selection,
    pub commit_rate: u32,
}

fn make_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} ({pos} elements)") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(msg.to_string());
    pb
}

/// Runs every selected pass, stage by stage.
///
/// All needed dump files are located before anything is processed, so a
/// missing file aborts the run without touching the store.
pub fn run_import(store: &mut dyn Store, config: &ImportConfig) -> Result<ImportStats> {
    if config.selection.is_empty() {
        bail!("Select something to load");
    }

    let mut plan = Vec::new();
    for stage in Stage::ALL {
        let passes = config.selection.passes_for(stage);
        if passes.is_empty() {
            continue;
        }
        plan.push((stage, config.dumps.locate(stage)?, passes));
    }

    let mut stats = ImportStats::new();
    for (stage, path, passes) in plan {
        info!(stage = stage.family(), path = %path.display(), "Starting stage");
        for pass in passes {
            stats.push(run_pass(store, &path, pass, config.commit_rate)?);
        }
    }
    Ok(stats)
}

/// Streams `path` once, applying the pass's processor to every element, and
/// commits whatever the last partial batch left open.
pub fn run_pass(store: &mut dyn Store, path: &Path, pass: Pass, commit_rate: u32) -> Result<PassStats> {
    let start = Instant::now();
    let apply = pass.processor();
    let mut reader = DumpReader::open(path, pass.stage().tag())?;
    let mut sink = BatchSink::new(commit_rate);
    let mut stats = PassStats::new(pass);

    info!(pass = pass.description(), "Extracting");
    let pb = make_spinner(&format!("Extracting {}", pass.description()));

    for element in reader.by_ref() {
        let element = element.with_context(|| format!("Failed to read {}", path.display()))?;
        stats.elements_seen += 1;
        let accepted = apply(store, &element)?;
        sink.record(store, accepted)?;
        if stats.elements_seen % PROGRESS_INTERVAL == 0 {
            pb.set_position(stats.elements_seen);
        }
    }
    pb.finish_and_clear();

    info!(pass = pass.description(), "Saving");
    store
        .commit()
        .with_context(|| format!("Final commit failed for {}", pass.description()))?;
    store.evict_all();

    stats.accepted = sink.accepted();
    stats.commits = sink.flushes();
    stats.peak_nodes = reader.peak_nodes();
    stats.duration_secs = start.elapsed().as_secs_f64();

    info!(
        pass = pass.description(),
        seen = stats.elements_seen,
        accepted = stats.accepted,
        commits = stats.commits,
        duration_secs = stats.duration_secs,
        "Done"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FailingCommitStore;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn stage_order_puts_entities_before_relations() {
        assert_eq!(
            Stage::ALL,
            [Stage::Labels, Stage::Artists, Stage::Masters, Stage::Releases]
        );
        for stage in Stage::ALL {
            assert!(stage.passes().iter().all(|p| p.stage() == stage));
        }
        assert_eq!(Stage::Labels.passes()[0], Pass::LabelNames);
        assert_eq!(Stage::Releases.passes()[0], Pass::ReleaseNames);
    }

    #[test]
    fn empty_selection_is_empty() {
        assert!(Selection::default().is_empty());
        assert!(!Selection::everything().is_empty());
    }

    #[test]
    fn selection_picks_individual_passes() {
        let selection = Selection {
            parent_labels: true,
            release_labels: true,
            ..Selection::default()
        };
        assert_eq!(selection.passes_for(Stage::Labels), vec![Pass::ParentLabels]);
        assert!(selection.passes_for(Stage::Artists).is_empty());
        assert_eq!(selection.passes_for(Stage::Releases), vec![Pass::ReleaseLabels]);
    }

    #[test]
    fn everything_selects_all_passes_in_order() {
        let selection = Selection::everything();
        let passes: Vec<Pass> = Stage::ALL
            .iter()
            .flat_map(|s| selection.passes_for(*s))
            .collect();
        assert_eq!(passes.len(), 10);
        assert_eq!(passes[1], Pass::ParentLabels);
        assert_eq!(passes[2], Pass::Sublabels);
    }

    #[test]
    fn dump_set_prefers_plain_xml() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("discogs_20130601_labels.xml.gz"), b"").unwrap();
        fs::write(dir.path().join("discogs_20130601_labels.xml"), b"").unwrap();
        let dumps = DumpSet::new(dir.path(), "20130601");
        assert_eq!(
            dumps.locate(Stage::Labels).unwrap(),
            dir.path().join("discogs_20130601_labels.xml")
        );
    }

    #[test]
    fn dump_set_finds_compressed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("discogs_20240101_masters.xml.bz2"), b"").unwrap();
        let dumps = DumpSet::new(dir.path(), "20240101");
        assert!(dumps.locate(Stage::Masters).unwrap().ends_with("discogs_20240101_masters.xml.bz2"));
    }

    #[test]
    fn failed_final_commit_aborts_the_pass() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discogs_20130601_labels.xml");
        fs::write(&path, "<labels><label><name>Warp Records</name></label></labels>").unwrap();
        let mut store = FailingCommitStore::new();
        let err = run_pass(&mut store, &path, Pass::LabelNames, 0).unwrap_err();
        assert!(format!("{err:#}").contains("Final commit failed for labels"));
        assert_eq!(store.commit_attempts, 1);
    }

    #[test]
    fn failed_batch_commit_aborts_the_import() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("discogs_20130601_labels.xml"),
            "<labels><label><name>A</name></label><label><name>B</name></label></labels>",
        )
        .unwrap();
        let config = ImportConfig {
            dumps: DumpSet::new(dir.path(), "20130601"),
            selection: Selection {
                labels: true,
                ..Selection::default()
            },
            commit_rate: 1,
        };
        let mut store = FailingCommitStore::new();
        assert!(run_import(&mut store, &config).is_err());
        assert_eq!(store.commit_attempts, 1);
    }

    #[test]
    fn dump_set_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let dumps = DumpSet::new(dir.path(), "20130601");
        let err = dumps.locate(Stage::Artists).unwrap_err();
        assert!(err.to_string().contains("discogs_20130601_artists"));
    }
}
