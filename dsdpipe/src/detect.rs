//! Source auto-detection: sniff a file's leading magic and open the
//! matching source node.

use std::io::Read;
use std::path::Path;

use tracing::debug;

use dsdsacd::{ImageFileSource, SacdReader, SECTOR_SIZE};

use crate::error::PipelineError;
use crate::nodes::dsdiff_source::DsdiffFileSource;
use crate::nodes::dsf_source::DsfFileSource;
use crate::nodes::sacd_source::SacdDiscSource;
use crate::nodes::FrameSource;
use crate::options::ChannelArea;

/// Source families the detector recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    /// Little-endian per-track container.
    Dsf,
    /// Big-endian container, raw or compressed.
    Dsdiff,
    /// Sector-addressed disc image.
    SacdImage,
}

fn detect_magic(magic: &[u8; 4]) -> Option<DetectedFormat> {
    match magic {
        b"DSD " => Some(DetectedFormat::Dsf),
        b"FRM8" => Some(DetectedFormat::Dsdiff),
        _ => None,
    }
}

/// Identify a file by its leading bytes, falling back to the disc-image
/// probe (sector-aligned length plus the master TOC signature).
pub fn detect_format(path: impl AsRef<Path>) -> Result<DetectedFormat, PipelineError> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if let Some(detected) = detect_magic(&magic) {
        return Ok(detected);
    }

    let len = file.metadata()?.len();
    if len % SECTOR_SIZE as u64 == 0 && len / SECTOR_SIZE as u64 > dsdsacd::MASTER_TOC_LSN as u64 {
        // A disc image announces itself at the master TOC sector.
        let mut source = ImageFileSource::open(path)?;
        if SacdReader::open(DetachedProbe(&mut source)).is_ok() {
            return Ok(DetectedFormat::SacdImage);
        }
    }
    Err(PipelineError::invalid_arg(format!(
        "unrecognised source file {}",
        path.display()
    )))
}

/// Borrowing adapter so the probe does not consume the source.
struct DetachedProbe<'a, S: dsdsacd::SectorSource>(&'a mut S);

impl<S: dsdsacd::SectorSource> dsdsacd::SectorSource for DetachedProbe<'_, S> {
    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8]) -> Result<(), dsdsacd::SacdError> {
        self.0.read_sectors(lsn, buf)
    }

    fn sector_count(&self) -> u64 {
        self.0.sector_count()
    }
}

/// Open a file-backed source of whatever family the file turns out to be.
pub fn open_file_source(
    path: impl AsRef<Path>,
    channel_area: ChannelArea,
) -> Result<Box<dyn FrameSource>, PipelineError> {
    let path = path.as_ref();
    let detected = detect_format(path)?;
    debug!(?detected, path = %path.display(), "detected source format");
    Ok(match detected {
        DetectedFormat::Dsf => Box::new(DsfFileSource::open(path)?),
        DetectedFormat::Dsdiff => Box::new(DsdiffFileSource::open(path)?),
        DetectedFormat::SacdImage => Box::new(SacdDiscSource::open(
            ImageFileSource::open(path)?,
            channel_area,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_identify_the_containers() {
        assert_eq!(detect_magic(b"DSD "), Some(DetectedFormat::Dsf));
        assert_eq!(detect_magic(b"FRM8"), Some(DetectedFormat::Dsdiff));
        assert_eq!(detect_magic(b"RIFF"), None);
    }

    #[test]
    fn garbage_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        assert!(matches!(
            detect_format(&path),
            Err(PipelineError::InvalidArg(_))
        ));
    }
}
