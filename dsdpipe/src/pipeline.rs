//! The coordinator: owns the source, the ordered sink list, the selected
//! tracks, and the transforms negotiation inserts; sequences the track
//! loop, fans frames out, reports progress, and honours cooperative
//! cancellation.
//!
//! Everything runs sequentially on one task. Within a track, every sink
//! sees frames in producer order with contiguous sequence numbers; across
//! tracks, all of track *k* precedes any of track *k+1*. A cancellation
//! request is observed between frames: the current track is ended
//! cleanly, remaining tracks are skipped, and finalize still runs so
//! partial outputs stay valid.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dsdmeta::TrackSelection;

use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::nodes::dst_decoder_node::DstDecompressor;
use crate::nodes::pcm_export_node::PcmExport;
use crate::nodes::{FrameSink, FrameSource, FrameTransform, SinkCapability};
use crate::options::PipelineOptions;
use crate::progress::{ProgressAction, ProgressCallback, ProgressReporter, ProgressSnapshot};

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub tracks_completed: u32,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Configured,
    Running,
    Ended,
}

/// Where a sink taps the transform chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tap {
    /// One-bit frames, after the decompressor when one is inserted.
    Raw,
    /// Multibit frames from the export transform.
    Pcm,
}

struct Plan {
    decompressor: Option<DstDecompressor>,
    pcm: Option<PcmExport>,
    taps: Vec<Tap>,
    raw_format: AudioFormat,
    pcm_format: Option<AudioFormat>,
}

pub struct Pipeline {
    options: PipelineOptions,
    source: Option<Box<dyn FrameSource>>,
    sinks: Vec<Box<dyn FrameSink>>,
    selection: Option<TrackSelection>,
    progress: ProgressReporter,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Pipeline {
            options,
            source: None,
            sinks: Vec::new(),
            selection: None,
            progress: ProgressReporter::new(None),
            state: PipelineState::Configured,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn set_source(&mut self, source: Box<dyn FrameSource>) -> Result<(), PipelineError> {
        self.check_configurable()?;
        self.source = Some(source);
        Ok(())
    }

    /// Sinks fan out in the order they were added.
    pub fn add_sink(&mut self, sink: Box<dyn FrameSink>) -> Result<(), PipelineError> {
        self.check_configurable()?;
        self.sinks.push(sink);
        Ok(())
    }

    /// Parse and set the track selection against the configured source.
    pub fn select_tracks(&mut self, selection: &str) -> Result<(), PipelineError> {
        self.check_configurable()?;
        let source = self
            .source
            .as_ref()
            .ok_or(PipelineError::InvalidState("select_tracks before set_source"))?;
        self.selection = Some(TrackSelection::parse(selection, source.track_count())?);
        Ok(())
    }

    pub fn on_progress(&mut self, callback: ProgressCallback) -> Result<(), PipelineError> {
        self.check_configurable()?;
        self.progress = ProgressReporter::new(Some(callback));
        Ok(())
    }

    fn check_configurable(&self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Configured {
            return Err(PipelineError::InvalidState(
                "pipeline can only be configured before a run",
            ));
        }
        Ok(())
    }

    /// Return an ended pipeline to the configured state for another run.
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Ended {
            return Err(PipelineError::InvalidState("reset requires an ended run"));
        }
        self.state = PipelineState::Configured;
        self.progress.reset();
        Ok(())
    }

    /// Spawn the run on a background task and return a control handle.
    pub fn start(mut self) -> PipelineHandle {
        let stop_token = CancellationToken::new();
        let token_for_task = stop_token.clone();
        let join_handle = tokio::spawn(async move {
            let result = self.run(token_for_task).await;
            (self, result)
        });
        PipelineHandle {
            stop_token,
            join_handle,
        }
    }

    /// Execute one run. At most one run at a time; afterwards the
    /// pipeline is ended until `reset`.
    pub async fn run(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        if self.state != PipelineState::Configured {
            return Err(PipelineError::InvalidState("run requires a configured pipeline"));
        }
        self.state = PipelineState::Running;
        self.progress.reset();

        let mut source = match self.source.take() {
            Some(source) => source,
            None => {
                self.state = PipelineState::Ended;
                return Err(PipelineError::invalid_arg("no source configured"));
            }
        };
        let result = self.run_with(&mut *source, &cancel).await;
        self.source = Some(source);
        self.state = PipelineState::Ended;
        result
    }

    async fn run_with(
        &mut self,
        source: &mut dyn FrameSource,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        if self.sinks.is_empty() {
            return Err(PipelineError::invalid_arg("no sinks configured"));
        }
        let source_format = source.format();
        source_format.validate()?;
        let album = source.album_info();
        let track_count = source.track_count();
        let selection = match &self.selection {
            Some(selection) => selection.clone(),
            None => TrackSelection::all(track_count),
        };
        if selection.is_empty() {
            return Err(PipelineError::invalid_arg("empty track selection"));
        }

        let mut plan = negotiate(&source_format, &self.sinks, &self.options)?;
        info!(
            tracks = selection.len(),
            decompress = plan.decompressor.is_some(),
            pcm = plan.pcm.is_some(),
            sinks = self.sinks.len(),
            "starting run"
        );

        let mut run_error: Option<PipelineError> = None;
        let mut opened = 0usize;
        for (sink, tap) in self.sinks.iter_mut().zip(&plan.taps) {
            let format = match tap {
                Tap::Raw => plan.raw_format,
                Tap::Pcm => plan.pcm_format.expect("pcm tap implies a pcm format"),
            };
            match sink.open(&format, &album).await {
                Ok(()) => opened += 1,
                Err(e) => {
                    run_error = Some(e);
                    break;
                }
            }
        }

        let mut bytes_written = 0u64;
        let mut tracks_completed = 0u32;
        let mut cancelled = false;
        let total_tracks = selection.len() as u32;

        if run_error.is_none() {
            'tracks: for (done, track_number) in selection.iter().enumerate() {
                let track = match source.track_info(track_number) {
                    Ok(track) => track,
                    Err(e) => {
                        run_error = Some(e);
                        break 'tracks;
                    }
                };
                if let Err(e) = source.seek_track(track_number).await {
                    run_error = Some(e);
                    break 'tracks;
                }
                debug!(track = track_number, "track start");

                // First sink error unwinds the sinks that already started.
                let mut started = 0usize;
                let mut start_error = None;
                for index in 0..self.sinks.len() {
                    match self.sinks[index].track_start(track_number, &track).await {
                        Ok(()) => started += 1,
                        Err(e) => {
                            start_error = Some(e);
                            break;
                        }
                    }
                }
                if let Some(e) = start_error {
                    for repaired in self.sinks.iter_mut().take(started) {
                        if let Err(inner) = repaired.track_end(track_number).await {
                            warn!(error = %inner, "track_end during repair failed");
                        }
                    }
                    run_error = Some(e);
                    break 'tracks;
                }

                let title = track
                    .title
                    .clone()
                    .or_else(|| album.title.clone());
                let duration = track.duration_frames.max(1);
                let mut track_frames = 0u64;
                let mut track_failed = false;

                loop {
                    if cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                    let frame = match source.next_frame().await {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(e) => {
                            run_error = Some(e);
                            track_failed = true;
                            break;
                        }
                    };
                    track_frames += 1;
                    if let Err(e) =
                        deliver(&mut plan, &mut self.sinks, &frame, &mut bytes_written).await
                    {
                        run_error = Some(e);
                        track_failed = true;
                        break;
                    }

                    let track_percent = (track_frames as f64 / duration as f64 * 100.0).min(100.0);
                    let snapshot = ProgressSnapshot {
                        track: track_number,
                        track_count: total_tracks,
                        bytes_written,
                        track_percent,
                        total_percent: (done as f64 + track_percent / 100.0)
                            / total_tracks as f64
                            * 100.0,
                        title: title.clone(),
                    };
                    if self.progress.emit(snapshot, false) == ProgressAction::Cancel {
                        cancelled = true;
                        break;
                    }
                }

                // The export transform is stateful; drain it at the
                // boundary so the last PCM samples land in this track.
                if !track_failed {
                    if let Some(flushed) = match flush_pcm(&mut plan).await {
                        Ok(frames) => Some(frames),
                        Err(e) => {
                            run_error = Some(e);
                            track_failed = true;
                            None
                        }
                    } {
                        for frame in flushed {
                            if let Err(e) = deliver_to_tap(
                                &mut self.sinks,
                                &plan.taps,
                                Tap::Pcm,
                                &frame,
                                &mut bytes_written,
                            )
                            .await
                            {
                                run_error = Some(e);
                                track_failed = true;
                                break;
                            }
                        }
                    }
                }

                for sink in self.sinks.iter_mut() {
                    if let Err(e) = sink.track_end(track_number).await {
                        warn!(error = %e, "track_end failed");
                        if run_error.is_none() {
                            run_error = Some(e);
                            track_failed = true;
                        }
                    }
                }
                if track_failed || run_error.is_some() {
                    break 'tracks;
                }
                tracks_completed += 1;
                debug!(track = track_number, "track end");

                let snapshot = ProgressSnapshot {
                    track: track_number,
                    track_count: total_tracks,
                    bytes_written,
                    track_percent: 100.0,
                    total_percent: (done + 1) as f64 / total_tracks as f64 * 100.0,
                    title: title.clone(),
                };
                if self.progress.emit(snapshot, true) == ProgressAction::Cancel {
                    cancelled = true;
                }
                if cancelled {
                    break 'tracks;
                }
            }
        }

        // Finalize and close every sink that observed an open, even after
        // an error or cancellation, so partial outputs stay valid.
        for sink in self.sinks.iter_mut().take(opened) {
            if let Err(e) = sink.finalize().await {
                warn!(error = %e, "sink finalize failed");
                if run_error.is_none() {
                    run_error = Some(e);
                }
            }
        }
        for sink in self.sinks.iter_mut().take(opened) {
            if let Err(e) = sink.close().await {
                warn!(error = %e, "sink close failed");
                if run_error.is_none() {
                    run_error = Some(e);
                }
            }
        }

        if let Some(error) = run_error {
            return Err(error);
        }
        if cancelled {
            info!(tracks_completed, "run cancelled");
            return Err(PipelineError::Cancelled);
        }

        self.progress.emit(
            ProgressSnapshot {
                track: selection.tracks().last().copied().unwrap_or(0),
                track_count: total_tracks,
                bytes_written,
                track_percent: 100.0,
                total_percent: 100.0,
                title: album.title.clone(),
            },
            true,
        );
        info!(tracks_completed, bytes_written, "run complete");
        Ok(RunSummary {
            tracks_completed,
            bytes_written,
        })
    }
}

async fn flush_pcm(plan: &mut Plan) -> Result<Vec<Frame>, PipelineError> {
    match plan.pcm.as_mut() {
        Some(pcm) => pcm.flush().await,
        None => Ok(Vec::new()),
    }
}

/// Push one source frame through the chain and fan the results out.
/// Fan-out is sequential in configuration order; a failing sink aborts
/// after earlier sinks already wrote.
async fn deliver(
    plan: &mut Plan,
    sinks: &mut [Box<dyn FrameSink>],
    frame: &Frame,
    bytes_written: &mut u64,
) -> Result<(), PipelineError> {
    let raw_frames: Vec<Frame> = match plan.decompressor.as_mut() {
        Some(decompressor) => decompressor.process(frame).await?,
        None => vec![frame.clone()],
    };

    for raw in &raw_frames {
        deliver_to_tap(sinks, &plan.taps, Tap::Raw, raw, bytes_written).await?;
    }

    if plan.pcm.is_some() {
        for raw in &raw_frames {
            let pcm_frames = plan
                .pcm
                .as_mut()
                .expect("checked above")
                .process(raw)
                .await?;
            for pcm in &pcm_frames {
                deliver_to_tap(sinks, &plan.taps, Tap::Pcm, pcm, bytes_written).await?;
            }
        }
    }
    Ok(())
}

async fn deliver_to_tap(
    sinks: &mut [Box<dyn FrameSink>],
    taps: &[Tap],
    tap: Tap,
    frame: &Frame,
    bytes_written: &mut u64,
) -> Result<(), PipelineError> {
    for (sink, sink_tap) in sinks.iter_mut().zip(taps) {
        if *sink_tap == tap {
            *bytes_written += sink.write_frame(frame).await?;
        }
    }
    Ok(())
}

/// Compute the transform chain from the source format and the union of
/// sink capabilities.
fn negotiate(
    source_format: &AudioFormat,
    sinks: &[Box<dyn FrameSink>],
    options: &PipelineOptions,
) -> Result<Plan, PipelineError> {
    let caps: Vec<SinkCapability> = sinks.iter().map(|s| s.capabilities()).collect();
    let wants_pcm = caps.iter().any(|c| *c == SinkCapability::Pcm);
    let wants_passthrough = caps
        .iter()
        .any(|c| *c == SinkCapability::OneBitPassthrough);
    let wants_raw = caps.iter().any(|c| *c == SinkCapability::OneBitRaw);

    if wants_passthrough && !options.write_compressed_passthrough {
        return Err(PipelineError::invalid_arg(
            "a sink requests compressed passthrough but the option is off",
        ));
    }

    let taps: Vec<Tap> = caps
        .iter()
        .map(|cap| match cap {
            SinkCapability::Pcm => Tap::Pcm,
            _ => Tap::Raw,
        })
        .collect();

    let (decompressor, raw_format) = match source_format.kind {
        AudioKind::OneBitCompressed => {
            if wants_passthrough {
                // Compressed frames go straight to the container sink;
                // anything that would need decoded audio is a
                // configuration conflict, rejected here rather than
                // silently decoded.
                if wants_pcm || wants_raw {
                    return Err(PipelineError::invalid_arg(
                        "compressed passthrough cannot be combined with sinks that need decoded audio",
                    ));
                }
                (None, *source_format)
            } else {
                let decompressor = DstDecompressor::new(source_format)?;
                let raw_format = decompressor.output_format(source_format);
                (Some(decompressor), raw_format)
            }
        }
        AudioKind::OneBitRaw => {
            if wants_passthrough {
                return Err(PipelineError::invalid_arg(
                    "compressed passthrough requires a compressed source",
                ));
            }
            (None, *source_format)
        }
        _ => {
            return Err(PipelineError::invalid_arg(
                "sources must produce one-bit audio",
            ))
        }
    };

    let (pcm, pcm_format) = if wants_pcm {
        let export = PcmExport::new(
            &raw_format,
            options.pcm_sample_rate,
            options.pcm_quality,
        )?;
        let format = export.output_format(&raw_format);
        (Some(export), Some(format))
    } else {
        (None, None)
    };

    Ok(Plan {
        decompressor,
        pcm,
        taps,
        raw_format,
        pcm_format,
    })
}

/// Control handle for a pipeline spawned with [`Pipeline::start`].
pub struct PipelineHandle {
    stop_token: CancellationToken,
    join_handle: JoinHandle<(Pipeline, Result<RunSummary, PipelineError>)>,
}

impl PipelineHandle {
    /// Request cooperative cancellation; non-blocking.
    pub fn stop(&self) {
        info!("pipeline stop requested");
        self.stop_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Token for integrating with other cancellation sources.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    /// Wait for the run; returns the pipeline (resettable for another
    /// run) alongside the run result.
    pub async fn wait(self) -> (Pipeline, Result<RunSummary, PipelineError>) {
        match self.join_handle.await {
            Ok(pair) => pair,
            // The task is never aborted, so a join failure is a panic.
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }

    /// Stop, then wait.
    pub async fn stop_and_wait(self) -> (Pipeline, Result<RunSummary, PipelineError>) {
        self.stop();
        self.wait().await
    }
}
