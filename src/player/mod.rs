//! Playback controller: Playlist (C16) and Player (C17).
//!
//! Data flow at playback: `Playlist -> Player -> SongDecoder ->
//! FormatAdapter -> Resampler -> PlaybackBuffer -> AudioOutput -> device`.
//!
//! The Player is a thin state machine over a [`Playlist`] and an
//! [`AudioOutput`]; it owns at most one [`SongDecoder`] at a time and
//! replaces it wholesale on track change, per the cooperative-cancellation
//! contract in §5 ("`jump_to` triggers abort of the previous decoder
//! before creating a new one").

pub mod audio;
pub mod format_adapter;
pub mod playback_buffer;
pub mod playlist;
pub mod resampler;
pub mod song_decoder;

pub use audio::{AudioOutput, AudioOutputEvent};
pub use playlist::{Playlist, PlaylistItem};
pub use resampler::DeviceFormat;
pub use song_decoder::SongDecoder;

use crate::model::ContentHash;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// How the Player resolves a playlist item's content hash to a playable
/// file and its known length. Kept separate from [`crate::library::LibraryStore`]
/// so the player doesn't need to take on the store's async/sqlx dependency.
pub trait SongResolver: Send + Sync {
    fn resolve_path(&self, hash: &ContentHash) -> Option<PathBuf>;
    fn song_length(&self, hash: &ContentHash) -> Option<f64>;
}

/// Default fade window applied before a duration-limited track ends.
const FADE_OUT_MSEC: u64 = 1500;
const DEFAULT_TEMPO: f32 = 1.0;
const DEFAULT_VOLUME: f32 = 1.0;

#[derive(Debug, Clone)]
pub enum PlayerSignal {
    StartedPlayback(PlaylistItem),
    InvalidTrack(PlaylistItem),
    TempoCoeffChanged(f32),
    VolumeChanged(f32),
}

pub struct Player {
    audio: Arc<AudioOutput>,
    playlist: Mutex<Playlist>,
    resolver: Arc<dyn SongResolver>,
    decoder: Mutex<Option<SongDecoder>>,
    keep_tempo: AtomicBool,
    keep_volume: AtomicBool,
    last_tempo: AtomicU32,
    last_volume: AtomicU32,
    generation: AtomicU64,
    signal_tx: Sender<PlayerSignal>,
    self_weak: Mutex<Weak<Player>>,
}

impl Player {
    /// Build a Player around a ready [`AudioOutput`] and a resolver that
    /// maps content hashes to files. Returns the player plus the signal
    /// receiver the UI/vote-server subscribe to.
    pub fn new(
        audio: Arc<AudioOutput>,
        resolver: Arc<dyn SongResolver>,
    ) -> (Arc<Self>, Receiver<PlayerSignal>) {
        let (signal_tx, signal_rx) = unbounded();
        let player = Arc::new_cyclic(|weak| Player {
            audio,
            playlist: Mutex::new(Playlist::new()),
            resolver,
            decoder: Mutex::new(None),
            keep_tempo: AtomicBool::new(false),
            keep_volume: AtomicBool::new(false),
            last_tempo: AtomicU32::new(DEFAULT_TEMPO.to_bits()),
            last_volume: AtomicU32::new(DEFAULT_VOLUME.to_bits()),
            generation: AtomicU64::new(0),
            signal_tx,
            self_weak: Mutex::new(weak.clone()),
        });
        (player, signal_rx)
    }

    pub fn playlist(&self) -> parking_lot::MutexGuard<'_, Playlist> {
        self.playlist.lock()
    }

    pub fn keep_tempo(&self) -> bool {
        self.keep_tempo.load(Ordering::Relaxed)
    }

    pub fn set_keep_tempo(&self, keep: bool) {
        self.keep_tempo.store(keep, Ordering::Relaxed);
    }

    pub fn keep_volume(&self) -> bool {
        self.keep_volume.load(Ordering::Relaxed)
    }

    pub fn set_keep_volume(&self, keep: bool) {
        self.keep_volume.store(keep, Ordering::Relaxed);
    }

    /// Directly set tempo as a user action: bypasses `keep_tempo` and is
    /// remembered for the next track load only if that flag is set.
    pub fn set_tempo(&self, coeff: f32) {
        let clamped = coeff.clamp(0.5, 2.0);
        self.last_tempo.store(clamped.to_bits(), Ordering::Relaxed);
        self.audio.set_tempo(clamped);
        let _ = self.signal_tx.send(PlayerSignal::TempoCoeffChanged(clamped));
    }

    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.last_volume.store(clamped.to_bits(), Ordering::Relaxed);
        self.audio.set_volume(clamped);
        let _ = self.signal_tx.send(PlayerSignal::VolumeChanged(clamped));
    }

    pub fn start_pause_playback(&self) {
        if self.audio.is_playing() {
            self.audio.pause();
            return;
        }
        if self.decoder.lock().is_none() {
            let current = self.playlist.lock().current_index();
            let idx = current.unwrap_or(0);
            if self.playlist.lock().items().is_empty() {
                return;
            }
            self.playlist.lock().set_current(Some(idx));
            self.load_current();
        }
        self.audio.start();
    }

    pub fn stop_playback(&self) {
        self.audio.stop();
        if let Some(mut decoder) = self.decoder.lock().take() {
            decoder.abort();
        }
    }

    pub fn prev_track(&self) {
        let idx = {
            let mut playlist = self.playlist.lock();
            playlist.prev().is_some().then(|| playlist.current_index()).flatten()
        };
        if idx.is_some() {
            self.load_current();
            self.audio.start();
        }
    }

    pub fn next_track(&self) {
        let advanced = {
            let mut playlist = self.playlist.lock();
            playlist.advance().is_some()
        };
        if advanced {
            self.load_current();
            self.audio.start();
        } else {
            self.stop_playback();
        }
    }

    pub fn jump_to(&self, index: usize) {
        {
            let mut playlist = self.playlist.lock();
            if index >= playlist.items().len() {
                return;
            }
            playlist.set_current(Some(index));
        }
        self.load_current();
        self.audio.start();
    }

    fn load_current(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut old) = self.decoder.lock().take() {
            old.abort();
        }

        let item = {
            let playlist = self.playlist.lock();
            playlist.current().cloned()
        };
        let Some(item) = item else { return };

        let Some(path) = self.resolver.resolve_path(&item.song_hash) else {
            let _ = self.signal_tx.send(PlayerSignal::InvalidTrack(item));
            return;
        };

        match SongDecoder::start(&path, self.audio.device_format()) {
            Ok(decoder) => {
                let total_frames = (self
                    .resolver
                    .song_length(&item.song_hash)
                    .unwrap_or(0.0)
                    * self.audio.device_format().sample_rate as f64) as u64;
                self.audio.load(decoder.buffer().clone(), total_frames);

                let tempo = if self.keep_tempo.load(Ordering::Relaxed) {
                    f32::from_bits(self.last_tempo.load(Ordering::Relaxed))
                } else {
                    DEFAULT_TEMPO
                };
                let volume = if self.keep_volume.load(Ordering::Relaxed) {
                    f32::from_bits(self.last_volume.load(Ordering::Relaxed))
                } else {
                    DEFAULT_VOLUME
                };
                self.audio.set_tempo(tempo);
                self.audio.set_volume(volume);

                *self.decoder.lock() = Some(decoder);
                self.schedule_fade_out(&item);
                let _ = self.signal_tx.send(PlayerSignal::StartedPlayback(item));
            }
            Err(e) => {
                tracing::warn!("failed to start decoder: {e}");
                let _ = self.signal_tx.send(PlayerSignal::InvalidTrack(item));
            }
        }
    }

    /// If the current item carries a duration limit, start a watchdog that
    /// fires `fade_out` once that many seconds of playback have elapsed,
    /// unless the track changes first (checked via the generation counter).
    fn schedule_fade_out(&self, item: &PlaylistItem) {
        let Some(limit) = item.duration_limit else { return };
        let generation = self.generation.load(Ordering::SeqCst);
        let audio = Arc::clone(&self.audio);
        let weak = self.self_weak.lock().clone();
        thread::spawn(move || {
            loop {
                thread::sleep(Duration::from_millis(200));
                let Some(player) = weak.upgrade() else { return };
                if player.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                if audio.current_position() >= limit {
                    audio.fade_out(FADE_OUT_MSEC);
                    return;
                }
            }
        });
    }

    /// Called when the audio output reports end-of-buffer; advances the
    /// playlist exactly as `next_track` would.
    pub fn on_track_finished(&self) {
        self.next_track();
    }
}

/// Bridges [`AudioOutput`]'s `TrackFinished` events into `Player::next_track`.
/// The audio output's event channel is created alongside it, before the
/// Player exists, so the two are wired together by the caller (see
/// `main.rs`) rather than internally by `Player::new`.
pub fn bridge_audio_events(player: Arc<Player>, audio_events: Receiver<AudioOutputEvent>) {
    thread::spawn(move || {
        while let Ok(event) = audio_events.recv() {
            match event {
                AudioOutputEvent::TrackFinished => player.on_track_finished(),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentHash;

    struct NullResolver;
    impl SongResolver for NullResolver {
        fn resolve_path(&self, _hash: &ContentHash) -> Option<PathBuf> {
            None
        }
        fn song_length(&self, _hash: &ContentHash) -> Option<f64> {
            None
        }
    }

    #[test]
    fn invalid_track_signal_emitted_when_resolver_has_no_path() {
        // Exercises the resolver contract directly; constructing a full
        // Player requires a real audio device, which CI sandboxes lack.
        let resolver = NullResolver;
        assert!(resolver.resolve_path(&ContentHash([0; 20])).is_none());
    }
}
