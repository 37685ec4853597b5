// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// On-disk layout of uploaded documents and their converted artifacts.
//
// Uploads live at `<root>/<YYYYMMDD>/<YYYYMMDDTHHMMSSZ>_<token>_<name>` and are
// identified by the path relative to the root (always `/`-separated). The
// print-ready PDF for a converted upload sits next to it with the suffix
// `.print.pdf` and shares its lifetime.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use printmeter_core::error::Result;
use tracing::{debug, instrument, warn};

/// Suffix appended to a stored relative path for its converted PDF.
pub const CONVERTED_SUFFIX: &str = ".print.pdf";

/// A document written into the upload store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the upload root, `/`-separated.
    pub rel_path: String,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
}

/// Root directory holding all uploads.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an upload under a fresh, collision-resistant name.
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len()))]
    pub fn save(&self, original_name: &str, bytes: &[u8], now: DateTime<Utc>) -> Result<StoredFile> {
        let day_dir = now.format("%Y%m%d").to_string();
        let token = uuid::Uuid::new_v4().simple().to_string();
        let stored_name = format!(
            "{}_{}_{}",
            now.format("%Y%m%dT%H%M%SZ"),
            &token[..12],
            sanitize_filename(original_name)
        );

        let abs_dir = self.root.join(&day_dir);
        std::fs::create_dir_all(&abs_dir)?;
        let abs_path = abs_dir.join(&stored_name);
        std::fs::write(&abs_path, bytes)?;

        let rel_path = format!("{day_dir}/{stored_name}");
        debug!(rel_path, "Upload stored");
        Ok(StoredFile { rel_path, abs_path })
    }

    /// Persist a converted PDF next to the upload it was derived from.
    pub fn save_converted(&self, stored_rel: &str, pdf: &[u8]) -> Result<StoredFile> {
        let rel_path = converted_rel_path(stored_rel);
        let abs_path = self.abs_path(&rel_path);
        if let Some(parent) = abs_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&abs_path, pdf)?;
        Ok(StoredFile { rel_path, abs_path })
    }

    /// Absolute location of a stored relative path.
    pub fn abs_path(&self, rel_path: &str) -> PathBuf {
        rel_path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// Remove an upload and its converted artifact, ignoring missing files.
    ///
    /// Returns how many files were actually removed.
    pub fn remove_with_artifacts(&self, stored_rel: &str) -> usize {
        if stored_rel.is_empty() {
            return 0;
        }
        [stored_rel.to_string(), converted_rel_path(stored_rel)]
            .iter()
            .filter(|rel| remove_best_effort(&self.abs_path(rel)))
            .count()
    }
}

/// Relative path of the converted artifact for an upload.
pub fn converted_rel_path(stored_rel: &str) -> String {
    format!("{stored_rel}{CONVERTED_SUFFIX}")
}

fn remove_best_effort(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove stored file");
            false
        }
    }
}

/// Reduce a client-supplied filename to a safe base name and extension.
///
/// The base keeps `[A-Za-z0-9_-]` (anything else becomes `_`) and is trimmed
/// of leading/trailing `_` and `-`; an empty base becomes `file`. The
/// extension is lower-cased and keeps only `.`, `a-z`, and `0-9`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = match base.rfind('.') {
        Some(idx) => base.split_at(idx),
        None => (base, ""),
    };

    let safe_stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe_stem = safe_stem.trim_matches(|c| c == '_' || c == '-');
    let safe_stem = if safe_stem.is_empty() { "file" } else { safe_stem };

    let safe_ext: String = ext
        .to_lowercase()
        .chars()
        .filter(|&c| c == '.' || c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    let safe_ext = if safe_ext == "." { "" } else { safe_ext.as_str() };

    format!("{safe_stem}{safe_ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_filename("Quarterly Report.PDF"), "Quarterly_Report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\notes.TXT"), "notes.txt");
        assert_eq!(sanitize_filename("__-résumé-__.docx"), "r_sum.docx");
        assert_eq!(sanitize_filename("???.png"), "file.png");
        assert_eq!(sanitize_filename("plain"), "plain");
        assert_eq!(sanitize_filename("trailing."), "trailing");
        assert_eq!(sanitize_filename(".bashrc"), "file.bashrc");
    }

    #[test]
    fn save_uses_dated_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 6).unwrap();

        let stored = store.save("My Doc.pdf", b"%PDF-", now).expect("save");
        assert!(stored.rel_path.starts_with("20260309/20260309T140506Z_"));
        assert!(stored.rel_path.ends_with("_My_Doc.pdf"));
        assert_eq!(stored.abs_path, store.abs_path(&stored.rel_path));
        assert_eq!(std::fs::read(&stored.abs_path).expect("read"), b"%PDF-");

        let again = store.save("My Doc.pdf", b"%PDF-", now).expect("save");
        assert_ne!(stored.rel_path, again.rel_path);
    }

    #[test]
    fn converted_artifact_removed_with_original() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path());
        let stored = store.save("photo.png", b"png", Utc::now()).expect("save");
        let converted = store.save_converted(&stored.rel_path, b"%PDF-").expect("save converted");
        assert_eq!(converted.rel_path, format!("{}.print.pdf", stored.rel_path));

        assert_eq!(store.remove_with_artifacts(&stored.rel_path), 2);
        assert!(!stored.abs_path.exists());
        assert!(!converted.abs_path.exists());
        // Second removal is a no-op.
        assert_eq!(store.remove_with_artifacts(&stored.rel_path), 0);
    }
}
