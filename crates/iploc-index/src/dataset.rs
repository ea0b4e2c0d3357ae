//! Locating the dataset CSV files on disk

use crate::{IndexError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const LOCATIONS_STEM: &str = "GeoLite2-City-Locations";
const BLOCKS_STEM: &str = "GeoLite2-City-Blocks";
const ARCHIVE_DIR_STEM: &str = "GeoLite2-City-CSV";

/// Preferred file names, tried before any other match
const LOCATIONS_PREFERRED: &[&str] = &[
    "GeoLite2-City-Locations.csv",
    "GeoLite2-City-Locations-en.csv",
];
const BLOCKS_PREFERRED: &[&str] = &[
    "GeoLite2-City-Blocks.csv",
    "GeoLite2-City-Blocks-IPv4.csv",
];

/// Paths of the two dataset tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFiles {
    pub locations: PathBuf,
    pub blocks: PathBuf,
}

impl DatasetFiles {
    /// Use explicit paths; both must exist
    pub fn new(locations: impl Into<PathBuf>, blocks: impl Into<PathBuf>) -> Result<Self> {
        let files = Self {
            locations: locations.into(),
            blocks: blocks.into(),
        };
        for path in [&files.locations, &files.blocks] {
            if !path.is_file() {
                return Err(IndexError::MissingFile(path.clone()));
            }
        }
        Ok(files)
    }

    /// Find the dataset in `dir`
    ///
    /// Looks for `GeoLite2-City-Locations*.csv` and `GeoLite2-City-Blocks*.csv`
    /// directly in `dir`, then in the newest `GeoLite2-City-CSV*` directory
    /// inside it, which is where unpacking the vendor archive leaves them.
    pub fn locate<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(IndexError::MissingFile(dir.to_path_buf()));
        }

        if let Some(files) = Self::find_in(dir)? {
            return Ok(files);
        }

        let mut archives: Vec<PathBuf> = list(dir)?
            .into_iter()
            .filter(|path| path.is_dir() && file_name(path).starts_with(ARCHIVE_DIR_STEM))
            .collect();
        archives.sort();

        if let Some(archive) = archives.last() {
            if let Some(files) = Self::find_in(archive)? {
                return Ok(files);
            }
        }

        let entries = list(dir)?;
        let missing = if pick(&entries, LOCATIONS_STEM, LOCATIONS_PREFERRED).is_none() {
            LOCATIONS_STEM
        } else {
            BLOCKS_STEM
        };
        Err(IndexError::MissingFile(dir.join(format!("{}*.csv", missing))))
    }

    fn find_in(dir: &Path) -> Result<Option<Self>> {
        let entries = list(dir)?;
        let locations = pick(&entries, LOCATIONS_STEM, LOCATIONS_PREFERRED);
        let blocks = pick(&entries, BLOCKS_STEM, BLOCKS_PREFERRED);
        Ok(locations.zip(blocks).map(|(locations, blocks)| Self { locations, blocks }))
    }
}

fn list(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn pick(entries: &[PathBuf], stem: &str, preferred: &[&str]) -> Option<PathBuf> {
    let candidates: Vec<&PathBuf> = entries
        .iter()
        .filter(|path| path.is_file())
        .filter(|path| {
            let name = file_name(path);
            name.starts_with(stem) && name.ends_with(".csv")
        })
        .collect();

    preferred
        .iter()
        .find_map(|want| candidates.iter().find(|path| file_name(path) == *want))
        .or_else(|| candidates.first())
        .map(|path| (*path).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::write(path, "header\n").unwrap();
    }

    #[test]
    fn test_locate_flat_directory() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("GeoLite2-City-Locations.csv"));
        touch(&temp.path().join("GeoLite2-City-Blocks.csv"));

        let files = DatasetFiles::locate(temp.path()).unwrap();
        assert_eq!(files.locations, temp.path().join("GeoLite2-City-Locations.csv"));
        assert_eq!(files.blocks, temp.path().join("GeoLite2-City-Blocks.csv"));
    }

    #[test]
    fn test_locate_prefers_english_locations() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("GeoLite2-City-Locations-de.csv"));
        touch(&temp.path().join("GeoLite2-City-Locations-en.csv"));
        touch(&temp.path().join("GeoLite2-City-Blocks-IPv4.csv"));

        let files = DatasetFiles::locate(temp.path()).unwrap();
        assert!(files.locations.ends_with("GeoLite2-City-Locations-en.csv"));
        assert!(files.blocks.ends_with("GeoLite2-City-Blocks-IPv4.csv"));
    }

    #[test]
    fn test_locate_inside_archive_directory() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("GeoLite2-City-CSV_20140107");
        let new = temp.path().join("GeoLite2-City-CSV_20140204");
        for dir in [&old, &new] {
            fs::create_dir(dir).unwrap();
            touch(&dir.join("GeoLite2-City-Locations.csv"));
            touch(&dir.join("GeoLite2-City-Blocks.csv"));
        }

        let files = DatasetFiles::locate(temp.path()).unwrap();
        assert!(files.blocks.starts_with(&new));
    }

    #[test]
    fn test_missing_dataset() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("GeoLite2-City-Locations.csv"));

        assert!(matches!(
            DatasetFiles::locate(temp.path()),
            Err(IndexError::MissingFile(_))
        ));
        assert!(matches!(
            DatasetFiles::locate(temp.path().join("absent")),
            Err(IndexError::MissingFile(_))
        ));
        assert!(DatasetFiles::new(
            temp.path().join("GeoLite2-City-Locations.csv"),
            temp.path().join("GeoLite2-City-Blocks.csv"),
        )
        .is_err());
    }
}
