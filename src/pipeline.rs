//! The read → infer → annotate → show loop.

use anyhow::{Context, Result};

use crate::annotate::{FrameAnnotator, FrameCounts};
use crate::capture::{CaptureError, FrameSource};
use crate::display::DisplaySink;
use crate::yolo::DetectionModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The source had no frame to give, either at its end or through a failure.
    SourceExhausted,
    QuitRequested,
}

pub struct Pipeline<S: FrameSource, M: DetectionModel, D: DisplaySink> {
    source: S,
    model: M,
    display: D,
    annotator: FrameAnnotator,
    state: PipelineState,
    frames: u64,
}

impl<S: FrameSource, M: DetectionModel, D: DisplaySink> Pipeline<S, M, D> {
    /// `source` must already be open.
    pub fn new(source: S, model: M, display: D, annotator: FrameAnnotator) -> Self {
        Self {
            source,
            model,
            display,
            annotator,
            state: PipelineState::Running,
            frames: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Run until the source runs dry or the display asks to quit.
    ///
    /// Source and display are released before this returns, including when
    /// the model or the display fails.
    pub fn run(&mut self) -> Result<StopReason> {
        let outcome = self.run_loop();
        self.stop();
        let reason = outcome?;
        log::info!(
            "stopped after {} frames: {:?}",
            self.frames,
            reason
        );
        Ok(reason)
    }

    fn run_loop(&mut self) -> Result<StopReason> {
        while self.state == PipelineState::Running {
            if let Some(reason) = self.step()? {
                return Ok(reason);
            }
        }
        Ok(StopReason::SourceExhausted)
    }

    /// One iteration. `Ok(Some(_))` means the loop is over.
    pub fn step(&mut self) -> Result<Option<StopReason>> {
        let frame = match self.source.read_frame() {
            Ok(frame) => frame,
            Err(CaptureError::EndOfStream) => {
                log::info!("{}: end of stream", self.source.describe());
                return Ok(Some(StopReason::SourceExhausted));
            }
            Err(err) => {
                log::warn!("failed to capture frame: {}", err);
                return Ok(Some(StopReason::SourceExhausted));
            }
        };
        log::debug!("captured frame {}x{}", frame.width(), frame.height());

        let detections = self
            .model
            .infer(&frame)
            .with_context(|| format!("inference on frame {}", self.frames + 1))?;

        let (annotated, counts) = self.annotator.annotate(frame, &detections);
        self.frames += 1;
        log_counts(self.frames, detections.len(), counts);

        self.display.show(&annotated)?;
        if self.display.poll_quit_requested() {
            log::info!("quit requested, exiting loop");
            return Ok(Some(StopReason::QuitRequested));
        }
        Ok(None)
    }

    /// Move to `Stopped` and release source and display. Later calls do nothing.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        self.state = PipelineState::Stopped;
        self.source.release();
        self.display.release();
    }
}

impl<S: FrameSource, M: DetectionModel, D: DisplaySink> Drop for Pipeline<S, M, D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn log_counts(frame: u64, detections: usize, counts: FrameCounts) {
    log::debug!(
        "frame {}: {} detections, people {}, vehicles {}",
        frame,
        detections,
        counts.people,
        counts.vehicles
    );
}
