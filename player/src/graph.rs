//! Builds the synthetic source -> passthrough* -> sink graph and drives it.

use crate::config::PipelineSettings;
use crate::log_and_continue;
use anyhow::{Context, Result};
use common::PipelineStatus;
use engine::stages::{CountingSink, Passthrough, SinkCounters, TestSource};
use engine::{Element, MediaState, Pipeline, link};
use std::sync::Arc;

pub struct PlayerGraph {
    pipeline: Pipeline,
    source: Arc<Element<TestSource>>,
    counters: Arc<SinkCounters>,
}

impl PlayerGraph {
    /// Create the elements and link them. Nothing is executed yet.
    pub fn build(settings: &PipelineSettings, element_logging: bool) -> Result<Self> {
        let mut pipeline = Pipeline::new();

        let source = Arc::new(Element::new(
            "source",
            TestSource::new(settings.frame_count, settings.frame_size),
        ));
        source.set_log_enabled(element_logging);
        let (out, mut upstream) = link(settings.link_capacity);
        source
            .add_output_pin(out)
            .context("Failed to add source output pin")?;
        pipeline.add(source.clone());

        for index in 0..settings.passthrough_stages {
            let stage = Arc::new(Element::new(
                format!("passthrough-{}", index),
                Passthrough::new(),
            ));
            stage.set_log_enabled(element_logging);
            stage
                .add_input_pin(upstream)
                .with_context(|| format!("Failed to add input pin to {}", stage.name()))?;

            let (out, input) = link(settings.link_capacity);
            stage
                .add_output_pin(out)
                .with_context(|| format!("Failed to add output pin to {}", stage.name()))?;
            upstream = input;
            pipeline.add(stage);
        }

        let sink_stage = CountingSink::new();
        let counters = sink_stage.counters();
        let sink = Arc::new(Element::new("sink", sink_stage));
        sink.set_log_enabled(element_logging);
        sink.add_input_pin(upstream)
            .context("Failed to add sink input pin")?;
        pipeline.add(sink);

        log::info!(
            "Built pipeline: source -> {} passthrough -> sink ({} frames of {} bytes)",
            settings.passthrough_stages,
            settings.frame_count,
            settings.frame_size
        );

        Ok(Self {
            pipeline,
            source,
            counters,
        })
    }

    /// Execute every element and start playback.
    pub fn start(&self) -> Result<()> {
        self.pipeline
            .execute()
            .context("Failed to execute pipeline")?;
        self.pipeline
            .set_state(MediaState::Playing)
            .context("Failed to start playback")?;
        Ok(())
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.counters.end_of_stream()
    }

    pub fn frames_received(&self) -> u64 {
        self.counters.buffers()
    }

    /// Play the stream again from the first frame.
    ///
    /// Blocks until every element is paused and flushed.
    pub fn restart(&self) -> Result<()> {
        self.pipeline
            .pause_and_flush()
            .context("Failed to pause and flush pipeline")?;
        self.source
            .with_stage(|source| source.rewind())
            .context("Failed to rewind source")?;
        self.counters.reset_end_of_stream();
        self.pipeline
            .set_state(MediaState::Playing)
            .context("Failed to resume playback")?;
        Ok(())
    }

    pub fn status(&self) -> Result<PipelineStatus> {
        Ok(self.pipeline.status()?)
    }

    /// Terminate every element and report the final status. Blocks.
    pub fn shutdown(&self) -> Result<PipelineStatus> {
        log_and_continue!(self.pipeline.terminate(), "terminate pipeline");
        self.status()
    }
}
