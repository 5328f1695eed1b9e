use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::{TrainingReport, VotingClassifier};
use crate::codec::CodecSet;
use crate::error::ArtifactError;
use crate::features::LectureFeatures;
use crate::models::EnrichedLectureRecord;
use crate::scaler::ScalerParams;

const CURRENT_FILE: &str = "CURRENT";
const LOCK_FILE: &str = "retrain.lock";
const MANIFEST_FILE: &str = "manifest.json";
const CODECS_FILE: &str = "codecs.json";
const SCALER_FILE: &str = "scaler.json";
const CLASSIFIER_FILE: &str = "classifier.json";
const ENRICHED_FILE: &str = "enriched.csv";
/// Published runs kept on disk, the live one included.
const KEEP_RUNS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub enriched_rows: usize,
    pub feature_names: Vec<String>,
    pub report: TrainingReport,
}

#[derive(Debug, Serialize, Deserialize)]
struct Stamped<T> {
    run_id: Uuid,
    artifact: T,
}

/// Everything inference needs, produced together and only ever replaced whole.
#[derive(Debug)]
pub struct ArtifactBundle {
    pub manifest: Manifest,
    pub codecs: CodecSet,
    pub scaler: ScalerParams,
    pub classifier: VotingClassifier,
    pub dataset: Vec<EnrichedLectureRecord>,
}

impl ArtifactBundle {
    pub fn run_id(&self) -> Uuid {
        self.manifest.run_id
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ArtifactError> {
    let csv_err = |source| ArtifactError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv_err(csv::Error::from(e.into_error())))?;
    write_atomic(path, &bytes)
}

pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ArtifactError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| ArtifactError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| ArtifactError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

/// Advisory lock on `retrain.lock`; the OS drops it if the holder dies.
#[derive(Debug)]
pub struct RetrainGuard {
    path: PathBuf,
    file: File,
}

impl Drop for RetrainGuard {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %err, "failed to release retrain lock");
        }
    }
}

pub struct ArtifactStore {
    root: PathBuf,
    live: RwLock<Option<Arc<ArtifactBundle>>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            live: RwLock::new(None),
        }
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir().join(run_id.to_string())
    }

    pub fn lock_retrain(&self) -> Result<RetrainGuard, ArtifactError> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
        let path = self.root.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err(&path))?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(ArtifactError::RetrainInProgress(path));
            }
            return Err(ArtifactError::Io { path, source: err });
        }

        file.set_len(0).map_err(io_err(&path))?;
        writeln!(file, "pid={} started={}", std::process::id(), Utc::now().to_rfc3339())
            .map_err(io_err(&path))?;
        Ok(RetrainGuard { path, file })
    }

    fn write_staging(&self, staging: &Path, bundle: &ArtifactBundle) -> Result<(), ArtifactError> {
        let run_id = bundle.run_id();
        fs::create_dir_all(staging).map_err(io_err(staging))?;

        write_json(&staging.join(MANIFEST_FILE), &bundle.manifest)?;
        write_json(
            &staging.join(CODECS_FILE),
            &Stamped {
                run_id,
                artifact: &bundle.codecs,
            },
        )?;
        write_json(
            &staging.join(SCALER_FILE),
            &Stamped {
                run_id,
                artifact: &bundle.scaler,
            },
        )?;
        write_json(
            &staging.join(CLASSIFIER_FILE),
            &Stamped {
                run_id,
                artifact: &bundle.classifier,
            },
        )?;
        write_csv(&staging.join(ENRICHED_FILE), &bundle.dataset)?;

        let runs = self.runs_dir();
        fs::create_dir_all(&runs).map_err(io_err(&runs))?;
        let final_dir = self.run_dir(run_id);
        fs::rename(staging, &final_dir).map_err(io_err(&final_dir))
    }

    /// Write the bundle into a staging directory, move it into `runs/`, then
    /// point `CURRENT` at it. Readers never observe a partial set.
    pub fn publish(&self, bundle: &ArtifactBundle) -> Result<PathBuf, ArtifactError> {
        let run_id = bundle.run_id();
        let staging = self.root.join(format!(".staging-{run_id}"));

        if let Err(err) = self.write_staging(&staging, bundle) {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(dir = %staging.display(), error = %cleanup, "failed to remove staging directory");
                }
            }
            return Err(err);
        }
        write_atomic(&self.root.join(CURRENT_FILE), run_id.to_string().as_bytes())?;

        let final_dir = self.run_dir(run_id);
        info!(%run_id, dir = %final_dir.display(), "published artifact set");
        self.prune(run_id);
        Ok(final_dir)
    }

    /// Remove all but the newest [`KEEP_RUNS`] runs. `keep` always survives.
    fn prune(&self, keep: Uuid) {
        let runs = self.runs_dir();
        let entries = match fs::read_dir(&runs) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %runs.display(), error = %err, "cannot list published runs");
                return;
            }
        };

        let mut published: Vec<(DateTime<Utc>, Uuid)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| Uuid::parse_str(&entry.file_name().to_string_lossy()).ok())
            .filter(|&run_id| run_id != keep)
            .filter_map(|run_id| {
                let manifest: Manifest = read_json(&self.run_dir(run_id).join(MANIFEST_FILE)).ok()?;
                Some((manifest.created_at, run_id))
            })
            .collect();
        published.sort_unstable_by(|a, b| b.cmp(a));

        for (_, run_id) in published.into_iter().skip(KEEP_RUNS.saturating_sub(1)) {
            let dir = self.run_dir(run_id);
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!(%run_id, "pruned old artifact set"),
                Err(err) => warn!(dir = %dir.display(), error = %err, "failed to prune artifact set"),
            }
        }
    }

    pub fn current_run_id(&self) -> Result<Uuid, ArtifactError> {
        let path = self.root.join(CURRENT_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NothingPublished(self.root.clone()));
            }
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        Uuid::parse_str(text.trim()).map_err(|_| ArtifactError::StaleArtifactSet {
            artifact: CURRENT_FILE.to_string(),
            expected: "a run id".to_string(),
            found: text.trim().to_string(),
        })
    }

    /// Load the live set, verify it belongs together, and swap it in.
    pub fn reload(&self) -> Result<Arc<ArtifactBundle>, ArtifactError> {
        let run_id = self.current_run_id()?;
        let bundle = Arc::new(self.load_run(run_id)?);

        match self.live.write() {
            Ok(mut live) => *live = Some(Arc::clone(&bundle)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&bundle)),
        }
        info!(%run_id, rows = bundle.dataset.len(), "loaded artifact set");
        Ok(bundle)
    }

    pub fn live(&self) -> Option<Arc<ArtifactBundle>> {
        match self.live.read() {
            Ok(live) => live.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The live bundle, loading it from disk on first use.
    pub fn current(&self) -> Result<Arc<ArtifactBundle>, ArtifactError> {
        match self.live() {
            Some(bundle) => Ok(bundle),
            None => self.reload(),
        }
    }

    pub fn load_run(&self, run_id: Uuid) -> Result<ArtifactBundle, ArtifactError> {
        let dir = self.run_dir(run_id);
        let manifest: Manifest = read_json(&dir.join(MANIFEST_FILE))?;
        let codecs: Stamped<CodecSet> = read_json(&dir.join(CODECS_FILE))?;
        let scaler: Stamped<ScalerParams> = read_json(&dir.join(SCALER_FILE))?;
        let classifier: Stamped<VotingClassifier> = read_json(&dir.join(CLASSIFIER_FILE))?;
        let dataset: Vec<EnrichedLectureRecord> = read_csv(&dir.join(ENRICHED_FILE))?;

        let expected = manifest.run_id.to_string();
        let stale = |artifact: &str, found: String| ArtifactError::StaleArtifactSet {
            artifact: artifact.to_string(),
            expected: expected.clone(),
            found,
        };

        if manifest.run_id != run_id {
            return Err(stale(MANIFEST_FILE, run_id.to_string()));
        }
        for (name, id) in [
            (CODECS_FILE, codecs.run_id),
            (SCALER_FILE, scaler.run_id),
            (CLASSIFIER_FILE, classifier.run_id),
        ] {
            if id != manifest.run_id {
                return Err(stale(name, id.to_string()));
            }
        }
        if dataset.len() != manifest.enriched_rows {
            return Err(stale(ENRICHED_FILE, format!("{} rows", dataset.len())));
        }
        if scaler.artifact.width() != LectureFeatures::NUM_FEATURES
            || classifier.artifact.n_features() != LectureFeatures::NUM_FEATURES
        {
            return Err(stale(
                "feature layout",
                format!(
                    "scaler {} / classifier {} columns",
                    scaler.artifact.width(),
                    classifier.artifact.n_features()
                ),
            ));
        }
        if let Some(table) = codecs.artifact.tables().into_iter().find(|t| !t.is_canonical()) {
            return Err(stale(CODECS_FILE, format!("unsorted {} table", table.field())));
        }

        Ok(ArtifactBundle {
            manifest,
            codecs: codecs.artifact,
            scaler: scaler.artifact,
            classifier: classifier.artifact,
            dataset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline;
    use crate::pipeline::tests::synthetic_rows;

    fn trained_bundle() -> ArtifactBundle {
        pipeline::run(synthetic_rows()).unwrap()
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.txt");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn nothing_published_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(store.reload(), Err(ArtifactError::NothingPublished(_))));
        assert!(store.live().is_none());
    }

    #[test]
    fn publish_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let bundle = trained_bundle();

        store.publish(&bundle).unwrap();
        let loaded = store.reload().unwrap();

        assert_eq!(loaded.run_id(), bundle.run_id());
        assert_eq!(loaded.codecs, bundle.codecs);
        assert_eq!(loaded.dataset.len(), bundle.dataset.len());
        assert_eq!(store.live().unwrap().run_id(), bundle.run_id());
    }

    #[test]
    fn newer_publish_supersedes_live_set_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let first = trained_bundle();
        store.publish(&first).unwrap();
        let held = store.reload().unwrap();

        let second = trained_bundle();
        store.publish(&second).unwrap();
        store.reload().unwrap();

        // a reader holding the old snapshot keeps it intact
        assert_eq!(held.run_id(), first.run_id());
        assert_eq!(store.live().unwrap().run_id(), second.run_id());
    }

    #[test]
    fn mixed_runs_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let first = trained_bundle();
        let second = trained_bundle();
        let first_dir = store.publish(&first).unwrap();
        let second_dir = store.publish(&second).unwrap();

        // graft the first run's scaler into the live second run
        fs::copy(first_dir.join(SCALER_FILE), second_dir.join(SCALER_FILE)).unwrap();

        match store.reload() {
            Err(ArtifactError::StaleArtifactSet { artifact, .. }) => assert_eq!(artifact, SCALER_FILE),
            other => panic!("expected stale artifact set, got {other:?}"),
        }
        assert!(store.live().is_none());
    }

    #[test]
    fn retrain_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let guard = store.lock_retrain().unwrap();
        assert!(matches!(
            store.lock_retrain(),
            Err(ArtifactError::RetrainInProgress(_))
        ));
        drop(guard);
        assert!(store.lock_retrain().is_ok());
    }

    #[test]
    fn leftover_lock_file_does_not_block_retraining() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        // a crashed run leaves the file behind but no lock on it
        fs::write(dir.path().join(LOCK_FILE), "pid=1 started=2024-01-01T00:00:00Z\n").unwrap();

        let guard = store.lock_retrain().unwrap();
        let contents = fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert!(contents.starts_with(&format!("pid={} ", std::process::id())));
        drop(guard);

        let stale = dir.path().join("stale.csv");
        write_csv(&stale, &synthetic_rows()).unwrap();
        assert!(pipeline::retrain(&stale, &store).is_ok());
    }

    #[test]
    fn failed_publish_removes_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let bundle = trained_bundle();

        // a directory where the manifest should go makes the write fail
        let staging = dir.path().join(format!(".staging-{}", bundle.run_id()));
        fs::create_dir_all(staging.join(MANIFEST_FILE)).unwrap();

        assert!(store.publish(&bundle).is_err());
        assert!(!staging.exists());
        assert!(!store.run_dir(bundle.run_id()).exists());
        assert!(matches!(
            store.current_run_id(),
            Err(ArtifactError::NothingPublished(_))
        ));
    }

    #[test]
    fn publish_prunes_old_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut bundle = trained_bundle();
        let start = bundle.manifest.created_at;

        let mut published = Vec::new();
        for i in 0..5 {
            bundle.manifest.run_id = Uuid::new_v4();
            bundle.manifest.created_at = start + chrono::Duration::seconds(i);
            store.publish(&bundle).unwrap();
            published.push(bundle.run_id());
        }

        let remaining = fs::read_dir(store.runs_dir()).unwrap().count();
        assert_eq!(remaining, KEEP_RUNS);
        for run_id in &published[..2] {
            assert!(!store.run_dir(*run_id).exists());
        }
        for run_id in &published[2..] {
            assert!(store.run_dir(*run_id).exists());
        }
        assert_eq!(store.reload().unwrap().run_id(), published[4]);
    }

    #[test]
    fn current_loads_once_then_serves_live_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let first = trained_bundle();
        store.publish(&first).unwrap();

        assert_eq!(store.current().unwrap().run_id(), first.run_id());

        let second = trained_bundle();
        store.publish(&second).unwrap();
        // still the swapped-in set until the next reload
        assert_eq!(store.current().unwrap().run_id(), first.run_id());
        store.reload().unwrap();
        assert_eq!(store.current().unwrap().run_id(), second.run_id());
    }
}
