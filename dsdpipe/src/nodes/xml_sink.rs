//! Structured metadata dump: a deterministic XML document describing the
//! album and every selected track. Payload bytes are ignored; only the
//! track lifecycle is observed.

use std::path::PathBuf;

use async_trait::async_trait;
use xmltree::{Element, EmitterConfig, XMLNode};

use dsdmeta::{AlbumInfo, TrackInfo};

use crate::error::PipelineError;
use crate::format::AudioFormat;
use crate::frame::Frame;
use crate::nodes::{FrameSink, SinkCapability};

pub struct XmlDumpSink {
    output_path: PathBuf,
    album: AlbumInfo,
    format: Option<AudioFormat>,
    tracks: Vec<TrackInfo>,
    in_track: bool,
    finalized: bool,
}

impl XmlDumpSink {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        XmlDumpSink {
            output_path: output_path.into(),
            album: AlbumInfo::default(),
            format: None,
            tracks: Vec::new(),
            in_track: false,
            finalized: false,
        }
    }
}

fn text_child(name: &str, value: Option<&str>) -> Element {
    let mut element = Element::new(name);
    // Missing fields render as empty elements rather than failing.
    if let Some(value) = value {
        element.children.push(XMLNode::Text(value.to_string()));
    }
    element
}

#[async_trait]
impl FrameSink for XmlDumpSink {
    fn capabilities(&self) -> SinkCapability {
        SinkCapability::MetadataOnly
    }

    async fn open(
        &mut self,
        format: &AudioFormat,
        album: &AlbumInfo,
    ) -> Result<(), PipelineError> {
        self.album = album.clone();
        self.format = Some(*format);
        Ok(())
    }

    async fn track_start(
        &mut self,
        _number: u32,
        track: &TrackInfo,
    ) -> Result<(), PipelineError> {
        if self.in_track {
            return Err(PipelineError::InvalidState("track already open"));
        }
        self.tracks.push(track.clone());
        self.in_track = true;
        Ok(())
    }

    async fn write_frame(&mut self, _frame: &Frame) -> Result<u64, PipelineError> {
        Ok(0)
    }

    async fn track_end(&mut self, _number: u32) -> Result<(), PipelineError> {
        if !self.in_track {
            return Err(PipelineError::InvalidState("track_end without track_start"));
        }
        self.in_track = false;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), PipelineError> {
        if self.finalized {
            return Err(PipelineError::InvalidState("finalize called twice"));
        }

        let mut root = Element::new("album");
        if let Some(format) = &self.format {
            root.children.push(XMLNode::Element(text_child(
                "sample_rate",
                Some(&format.sample_rate_hz.to_string()),
            )));
            root.children.push(XMLNode::Element(text_child(
                "channels",
                Some(&format.channels.to_string()),
            )));
        }
        root.children
            .push(XMLNode::Element(text_child("title", self.album.title.as_deref())));
        root.children.push(XMLNode::Element(text_child(
            "artist",
            self.album.artist.as_deref(),
        )));
        root.children.push(XMLNode::Element(text_child(
            "publisher",
            self.album.publisher.as_deref(),
        )));
        root.children.push(XMLNode::Element(text_child(
            "copyright",
            self.album.copyright.as_deref(),
        )));
        root.children.push(XMLNode::Element(text_child(
            "catalog",
            self.album.catalog_number.as_deref(),
        )));
        root.children.push(XMLNode::Element(text_child(
            "genre",
            self.album.genre.as_deref(),
        )));
        root.children.push(XMLNode::Element(text_child(
            "year",
            self.album.year.map(|y| y.to_string()).as_deref(),
        )));

        let mut tracks = Element::new("tracks");
        for track in &self.tracks {
            let mut node = Element::new("track");
            node.attributes
                .insert("number".to_string(), track.number.to_string());
            node.children
                .push(XMLNode::Element(text_child("title", track.title.as_deref())));
            node.children.push(XMLNode::Element(text_child(
                "performer",
                track.performer.as_deref(),
            )));
            node.children.push(XMLNode::Element(text_child(
                "composer",
                track.composer.as_deref(),
            )));
            node.children.push(XMLNode::Element(text_child(
                "arranger",
                track.arranger.as_deref(),
            )));
            node.children.push(XMLNode::Element(text_child(
                "songwriter",
                track.songwriter.as_deref(),
            )));
            node.children.push(XMLNode::Element(text_child(
                "isrc",
                track.isrc.as_ref().map(|i| i.as_str()),
            )));
            node.children.push(XMLNode::Element(text_child(
                "start",
                Some(&track.start_time().to_string()),
            )));
            node.children.push(XMLNode::Element(text_child(
                "duration",
                Some(&track.duration_time().to_string()),
            )));
            for (key, value) in &track.extra {
                let mut extra = Element::new("tag");
                extra.attributes.insert("name".to_string(), key.clone());
                extra.children.push(XMLNode::Text(value.clone()));
                node.children.push(XMLNode::Element(extra));
            }
            tracks.children.push(XMLNode::Element(node));
        }
        root.children.push(XMLNode::Element(tracks));

        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(&self.output_path)?;
        let config = EmitterConfig::new().perform_indent(true);
        root.write_with_config(file, config)
            .map_err(|e| PipelineError::invalid_arg(format!("XML write failed: {e}")))?;
        self.finalized = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioKind;

    #[tokio::test]
    async fn dump_is_deterministic_and_nullable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("album.xml");

        let format = AudioFormat::new(AudioKind::OneBitRaw, 2_822_400, 2).unwrap();
        let album = AlbumInfo {
            title: Some("Album".into()),
            ..Default::default()
        };
        let track = TrackInfo {
            title: Some("Song".into()),
            number: 1,
            total: 1,
            duration_frames: 150,
            ..Default::default()
        };

        let mut sink = XmlDumpSink::new(&path);
        sink.open(&format, &album).await.unwrap();
        sink.track_start(1, &track).await.unwrap();
        sink.track_end(1).await.unwrap();
        sink.finalize().await.unwrap();
        sink.close().await.unwrap();

        let first = std::fs::read_to_string(&path).unwrap();
        assert!(first.contains("<album>"));
        assert!(first.contains("<sample_rate>2822400</sample_rate>"));
        assert!(first.contains("<title>Song</title>"));
        assert!(first.contains("number=\"1\""));
        // Missing artist renders as an empty element, not an error.
        assert!(first.contains("<artist"));
        assert!(first.contains("<duration>00:02:00</duration>"));
    }
}
