//! Reporter bridge: turns page captures into `updateInfo` submissions.
//!
//! A capture arrives on every page event.  Besides those, a fixed-interval
//! tick re-submits the latest capture with a fresh timestamp so the hub
//! keeps seeing this source as alive.  Each submission is one cycle:
//! stamp, resolve artwork, submit.  Cycles may overlap while artwork is
//! being probed; a cycle that settles after a newer one was already
//! submitted, or after the page reported no media, is dropped.

use std::sync::Arc;
use std::time::Duration;

use nowplaying_proto::artwork::{self, ImageProbe, PlaceholderSignature};
use nowplaying_proto::protocol::{MediaKind, MediaReport, PlayerCommand, Reply, Request};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connection::{HubReader, HubWriter};

/// What the page side saw, one JSON object per line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capture {
    pub title: Option<String>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(rename = "type")]
    pub kind: Option<MediaKind>,
    pub image: Option<String>,
    pub video_id: Option<String>,
    /// The page no longer has media; clear whatever this source owns.
    #[serde(default)]
    pub clear: bool,
}

impl Capture {
    pub fn has_media(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    fn to_report(&self, timestamp: u64) -> MediaReport {
        MediaReport {
            title: self.title.clone(),
            is_playing: Some(self.is_playing),
            timestamp: Some(timestamp),
            image: None,
            kind: self.kind,
            video_id: self.video_id.clone(),
        }
    }
}

/// How a cycle gets its artwork.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtworkPlan {
    /// Use what the page gave us (or nothing).
    Direct(Option<String>),
    /// Already resolved for this video.
    Cached(String),
    /// Run the thumbnail waterfall.
    Probe {
        video_id: String,
        candidates: Vec<String>,
    },
}

/// Last successful waterfall, keyed by video id.  Misses are not kept so
/// the next cycle probes again.
pub type ArtworkCache = Option<(String, String)>;

pub fn plan_artwork(capture: &Capture, youtube_base: &str, cache: &ArtworkCache) -> ArtworkPlan {
    match (capture.kind, capture.video_id.as_deref()) {
        (Some(MediaKind::Youtube), Some(video_id)) if !video_id.is_empty() => match cache {
            Some((cached_id, image)) if cached_id == video_id => ArtworkPlan::Cached(image.clone()),
            _ => ArtworkPlan::Probe {
                video_id: video_id.to_string(),
                candidates: artwork::youtube_candidates(youtube_base, video_id),
            },
        },
        _ => ArtworkPlan::Direct(capture.image.clone()),
    }
}

/// Orders cycles.  Timestamps handed out never go backwards, and a cycle
/// may only be submitted if nothing newer has been.
#[derive(Debug, Default)]
pub struct CycleTracker {
    started: u64,
    submitted: u64,
    last_timestamp: u64,
}

impl CycleTracker {
    /// Open a cycle: returns its generation and capture timestamp.
    pub fn begin(&mut self, now_ms: u64) -> (u64, u64) {
        self.started += 1;
        self.last_timestamp = self.last_timestamp.max(now_ms);
        (self.started, self.last_timestamp)
    }

    /// Retire every cycle started so far; none of them may be submitted.
    pub fn invalidate(&mut self) {
        self.submitted = self.started;
    }

    /// Whether the cycle `generation` should still be submitted.
    pub fn settle(&mut self, generation: u64) -> bool {
        if generation <= self.submitted {
            return false;
        }
        self.submitted = generation;
        true
    }
}

/// A cycle whose artwork is known.
#[derive(Debug)]
struct Settled {
    generation: u64,
    report: MediaReport,
    resolved: Option<(String, Option<String>)>,
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub struct Reporter<P> {
    probe: Arc<P>,
    youtube_base: String,
    interval: Duration,
    tracker: CycleTracker,
    cache: ArtworkCache,
    settled_tx: mpsc::UnboundedSender<Settled>,
    settled_rx: mpsc::UnboundedReceiver<Settled>,
}

impl<P: ImageProbe + 'static> Reporter<P> {
    pub fn new(probe: Arc<P>, youtube_base: String, interval: Duration) -> Self {
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        Self {
            probe,
            youtube_base,
            interval,
            tracker: CycleTracker::default(),
            cache: None,
            settled_tx,
            settled_rx,
        }
    }

    /// Drive cycles until the capture stream ends or the hub goes away.
    /// Commands routed to this source are forwarded to `commands_out`.
    pub async fn run(
        mut self,
        mut captures: mpsc::Receiver<Capture>,
        reader: HubReader,
        mut writer: HubWriter,
        commands_out: mpsc::Sender<PlayerCommand>,
    ) -> anyhow::Result<()> {
        let mut hub = tokio::spawn(forward_commands(reader, commands_out));

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut latest: Option<Capture> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(capture) = &latest {
                        self.start_cycle(capture);
                    }
                }

                capture = captures.recv() => {
                    let Some(capture) = capture else {
                        info!("capture stream ended, clearing this source");
                        writer.send(Request::UpdateInfo { info: MediaReport::empty() }).await?;
                        break;
                    };
                    if capture.clear || !capture.has_media() {
                        debug!("page reported no media");
                        latest = None;
                        self.tracker.invalidate();
                        writer.send(Request::UpdateInfo { info: MediaReport::empty() }).await?;
                    } else {
                        self.start_cycle(&capture);
                        latest = Some(capture);
                    }
                }

                Some(settled) = self.settled_rx.recv() => {
                    if let Some((video_id, Some(image))) = settled.resolved {
                        self.cache = Some((video_id, image));
                    }
                    if !self.tracker.settle(settled.generation) {
                        debug!("cycle {} settled late, discarded", settled.generation);
                        continue;
                    }
                    writer.send(Request::UpdateInfo { info: settled.report }).await?;
                }

                result = &mut hub => {
                    result??;
                    anyhow::bail!("hub closed the connection");
                }
            }
        }

        hub.abort();
        writer.shutdown().await
    }

    fn start_cycle(&mut self, capture: &Capture) {
        let (generation, timestamp) = self.tracker.begin(now_ms());
        let mut report = capture.to_report(timestamp);
        let settled_tx = self.settled_tx.clone();

        let ready = match plan_artwork(capture, &self.youtube_base, &self.cache) {
            ArtworkPlan::Direct(image) => image,
            ArtworkPlan::Cached(image) => Some(image),
            ArtworkPlan::Probe {
                video_id,
                candidates,
            } => {
                debug!("cycle {}: probing artwork for {}", generation, video_id);
                let probe = Arc::clone(&self.probe);
                tokio::spawn(async move {
                    let image =
                        artwork::resolve(&candidates, &*probe, &PlaceholderSignature::YOUTUBE)
                            .await;
                    report.image = image.clone();
                    let _ = settled_tx.send(Settled {
                        generation,
                        report,
                        resolved: Some((video_id, image)),
                    });
                });
                return;
            }
        };
        report.image = ready;
        let _ = settled_tx.send(Settled {
            generation,
            report,
            resolved: None,
        });
    }
}

async fn forward_commands(
    mut reader: HubReader,
    commands_out: mpsc::Sender<PlayerCommand>,
) -> anyhow::Result<()> {
    while let Some(reply) = reader.recv().await? {
        match reply {
            Reply::Command { command } => {
                info!("hub routed {}", command);
                if commands_out.send(command).await.is_err() {
                    break;
                }
            }
            Reply::Error { message } => warn!("hub rejected a frame: {}", message),
            other => debug!("hub: {:?}", other),
        }
    }
    Ok(())
}
