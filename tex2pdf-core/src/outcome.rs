//! Packs an [`OutcomeMeta`] plus artifacts into a gzipped tar archive (and
//! unpacks incoming submission tarballs), mirroring
//! `converter_driver.py`'s `ConversionOutcomeMaker` and the teacher's own
//! archive-adjacent helpers.

use std::fs::File;
use std::io::Read as _;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::errors::ArchiveError;
use crate::types::OutcomeMeta;

const OUTCOME_META_FILENAME: &str = "outcome.json";

/// Write `meta` (as pretty JSON) plus every file in `out_directory` into a
/// single `.tar.gz` at `archive_path`.
pub fn pack_outcome(meta: &OutcomeMeta, out_directory: &Path, archive_path: &Path) -> Result<(), ArchiveError> {
    let file = File::create(archive_path).map_err(|e| ArchiveError::Write(e.to_string()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    let meta_json = serde_json::to_vec_pretty(meta).map_err(|e| ArchiveError::Write(e.to_string()))?;
    let mut header = tar::Header::new_gnu();
    header.set_size(meta_json.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, OUTCOME_META_FILENAME, meta_json.as_slice()).map_err(|e| ArchiveError::Write(e.to_string()))?;

    for name in &meta.out_files {
        let path = out_directory.join(name);
        if path.exists() {
            builder.append_path_with_name(&path, name).map_err(|e| ArchiveError::Write(e.to_string()))?;
        }
    }

    builder.finish().map_err(|e| ArchiveError::Write(e.to_string()))?;
    Ok(())
}

/// Extract a submission tarball into `dest_dir`, rejecting any entry whose
/// path would escape `dest_dir` (path traversal) and any archive containing
/// a `removed.txt` marker (arXiv's "this submission was withdrawn" convention).
pub fn unpack_submission(archive_path: &Path, dest_dir: &Path) -> Result<Vec<String>, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| ArchiveError::Read(e.to_string()))?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    let mut extracted = Vec::new();
    for entry in archive.entries().map_err(|e| ArchiveError::Read(e.to_string()))? {
        let mut entry = entry.map_err(|e| ArchiveError::Read(e.to_string()))?;
        let path = entry.path().map_err(|e| ArchiveError::Read(e.to_string()))?.into_owned();

        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(ArchiveError::PathTraversal(path.display().to_string()));
        }
        if path.file_name().and_then(|f| f.to_str()) == Some("removed.txt") {
            return Err(ArchiveError::Read("submission archive contains removed.txt".to_string()));
        }

        let target = dest_dir.join(&path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::Write(e.to_string()))?;
        }
        entry.unpack(&target).map_err(|e| ArchiveError::Write(e.to_string()))?;
        if target.is_file() {
            extracted.push(path.display().to_string());
        }
    }

    Ok(extracted)
}

/// Read back just the `outcome.json` member of a packed archive, without
/// extracting the rest — used by the scorecard harvester.
pub fn read_outcome_meta(archive_path: &Path) -> Result<OutcomeMeta, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| ArchiveError::Read(e.to_string()))?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries().map_err(|e| ArchiveError::Read(e.to_string()))? {
        let mut entry = entry.map_err(|e| ArchiveError::Read(e.to_string()))?;
        let path = entry.path().map_err(|e| ArchiveError::Read(e.to_string()))?.into_owned();
        if path.to_str() == Some(OUTCOME_META_FILENAME) {
            let mut contents = String::new();
            entry.read_to_string(&mut contents).map_err(|e| ArchiveError::Read(e.to_string()))?;
            return serde_json::from_str(&contents).map_err(|e| ArchiveError::Read(e.to_string()));
        }
    }
    Err(ArchiveError::Read(format!("{OUTCOME_META_FILENAME} not found in archive")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn pack_and_read_outcome_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        std::fs::write(out_dir.join("main.pdf"), b"%PDF-1.5 fixture").unwrap();

        let mut meta = OutcomeMeta::new("tag123", PathBuf::from("/in"), out_dir.clone());
        meta.status = "success".to_string();
        meta.out_files.push("main.pdf".to_string());

        let archive_path = dir.path().join("outcome.tar.gz");
        pack_outcome(&meta, &out_dir, &archive_path).unwrap();

        let read_back = read_outcome_meta(&archive_path).unwrap();
        assert_eq!(read_back.tag, "tag123");
        assert_eq!(read_back.status, "success");
    }

    #[test]
    fn unpack_rejects_removed_marker() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("submission.tar.gz");
        {
            let file = File::create(&archive_path).unwrap();
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = Builder::new(encoder);
            let data = b"withdrawn";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "removed.txt", data.as_slice()).unwrap();
            builder.finish().unwrap();
        }

        let dest = dir.path().join("extracted");
        std::fs::create_dir(&dest).unwrap();
        let err = unpack_submission(&archive_path, &dest).unwrap_err();
        assert!(matches!(err, ArchiveError::Read(_)));
    }

    #[test]
    fn unpack_extracts_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("submission.tar.gz");
        {
            let file = File::create(&archive_path).unwrap();
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = Builder::new(encoder);
            let data = b"\\documentclass{article}";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "main.tex", data.as_slice()).unwrap();
            builder.finish().unwrap();
        }

        let dest = dir.path().join("extracted");
        std::fs::create_dir(&dest).unwrap();
        let files = unpack_submission(&archive_path, &dest).unwrap();
        assert_eq!(files, vec!["main.tex".to_string()]);
        assert!(dest.join("main.tex").exists());
    }
}
