//! Known-student roster.
//!
//! Reference embeddings are loaded once at startup, either from the binary
//! encoding cache or by scanning a directory of labeled reference images,
//! and are never mutated while serving traffic.

use crate::face::FaceExtractor;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Reference-image extensions considered during a scan.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding cache: {0}")]
    Cache(#[from] bincode::Error),
}

/// A known student and their reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub embedding: Embedding,
}

/// On-disk cache layout. Index `i` of `encodings` pairs with index `i`
/// of `names`.
#[derive(Debug, Serialize, Deserialize)]
struct EncodingCache {
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
}

/// Immutable snapshot of known identities, built once at startup and shared
/// read-only across frame-handling tasks.
#[derive(Debug, Default)]
pub struct Roster {
    identities: Vec<Identity>,
}

impl Roster {
    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    /// Load the roster: from the encoding cache when present, otherwise by
    /// scanning the reference-image directory (persisting the cache for
    /// future startups).
    ///
    /// A missing directory is created and yields an empty roster; no cache
    /// is written in that case.
    pub fn load(
        cache_path: &Path,
        students_dir: &Path,
        extractor: &mut dyn FaceExtractor,
    ) -> Result<Self, RosterError> {
        if cache_path.exists() {
            let roster = Self::from_cache(cache_path)?;
            tracing::info!(
                count = roster.len(),
                path = %cache_path.display(),
                "loaded roster from encoding cache"
            );
            return Ok(roster);
        }

        if !students_dir.exists() {
            fs::create_dir_all(students_dir)?;
            tracing::warn!(
                dir = %students_dir.display(),
                "students directory missing; starting with an empty roster"
            );
            return Ok(Self::default());
        }

        let roster = Self::scan(students_dir, extractor)?;
        roster.save_cache(cache_path)?;
        tracing::info!(count = roster.len(), "roster encoded and cached");
        Ok(roster)
    }

    /// Deserialize the binary encoding cache.
    pub fn from_cache(cache_path: &Path) -> Result<Self, RosterError> {
        let bytes = fs::read(cache_path)?;
        let cache: EncodingCache = bincode::deserialize(&bytes)?;

        let identities = cache
            .names
            .into_iter()
            .zip(cache.encodings)
            .map(|(name, values)| Identity {
                name,
                embedding: Embedding::new(values),
            })
            .collect();

        Ok(Self { identities })
    }

    /// Serialize the roster into the binary encoding cache.
    pub fn save_cache(&self, cache_path: &Path) -> Result<(), RosterError> {
        let cache = EncodingCache {
            encodings: self
                .identities
                .iter()
                .map(|id| id.embedding.values.clone())
                .collect(),
            names: self.identities.iter().map(|id| id.name.clone()).collect(),
        };

        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(cache_path, bincode::serialize(&cache)?)?;
        Ok(())
    }

    /// Scan a directory of labeled reference images, extracting one
    /// embedding per image (the first detected face).
    ///
    /// Unreadable images and images with no detectable face are logged and
    /// skipped; neither aborts the scan. Entries are processed in filename
    /// order so the roster (and tie-breaking) is deterministic.
    fn scan(students_dir: &Path, extractor: &mut dyn FaceExtractor) -> Result<Self, RosterError> {
        let mut paths: Vec<_> = fs::read_dir(students_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut identities = Vec::new();
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = display_name(stem);

            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "cannot read reference image; skipping");
                    continue;
                }
            };

            let observations = match extractor.extract(&image) {
                Ok(obs) => obs,
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "face extraction failed; skipping");
                    continue;
                }
            };

            match observations.into_iter().next() {
                Some(obs) => {
                    tracing::info!(name = %name, "encoded reference image");
                    identities.push(Identity {
                        name,
                        embedding: obs.embedding,
                    });
                }
                None => {
                    tracing::warn!(path = %path.display(), "no face found in reference image; skipping");
                }
            }
        }

        Ok(Self { identities })
    }

    /// Find the closest identity by embedding distance.
    ///
    /// Returns a match only when the minimum distance is strictly below
    /// `threshold`. Ties keep the first identity in roster order. An empty
    /// roster returns `None` without computing any distance.
    pub fn identify(&self, probe: &Embedding, threshold: f32) -> Option<&Identity> {
        if self.identities.is_empty() {
            return None;
        }

        let mut best_idx = 0;
        let mut best_dist = f32::INFINITY;
        for (i, identity) in self.identities.iter().enumerate() {
            let dist = identity.embedding.distance(probe);
            // strict < keeps the first occurrence on ties
            if dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }

        (best_dist < threshold).then(|| &self.identities[best_idx])
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Derive a display name from a reference-image filename stem:
/// separators become spaces and each word is title-cased,
/// `"aman-singh"` -> `"Aman Singh"`.
pub fn display_name(stem: &str) -> String {
    stem.replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
