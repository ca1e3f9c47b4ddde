use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use marquee_show::{Playlist, PlaylistStep, DEFAULT_FRAME_MS};

use crate::command::{CommandError, CommandRegistry};
use crate::frame::{FrameCompositor, FrameConsumer, OutputProcessor, OverlaySet};
use crate::messages::{Settings, SyncMode};
use crate::output::OutputSink;
use crate::show::{ScheduleDocument, ScheduleStore, StoreError};
use crate::sync::{
    SyncAction, SyncFileType, SyncPacket, SyncSession, SyncTransport, UdpBroadcastTransport,
    FPP_CTRL_PORT,
};

use super::options::ScheduleOptions;
use super::running_schedule::RunningSchedule;

/// Frame period returned straight after playback starts so the first frames go out promptly.
pub const START_FRAME_MS: u32 = 25;

const QUEUE_NAME: &str = "Song Queue";

/// Which source owns playback. Earlier variants pre-empt later ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Immediate,
    Queued,
    /// Index into the active schedules.
    Scheduled(usize),
}

/// How to start a playlist played on demand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayOptions {
    pub looped: bool,
    pub random: bool,
    /// Passes through the playlist. Zero or one plays it once.
    pub loops: u32,
    pub step: Option<String>,
    /// Stop once the starting step has played.
    pub force_last: bool,
    /// Repeat count for the starting step.
    pub step_loops: Option<u32>,
}

impl PlayOptions {
    pub fn looped(looped: bool) -> Self {
        Self {
            looped,
            ..Self::default()
        }
    }

    pub fn from_step(step: impl Into<String>) -> Self {
        Self {
            step: Some(step.into()),
            ..Self::default()
        }
    }
}

/// Decides which playlist plays, advances it one frame at a time and composites the result
/// into the output sink.
///
/// All mutation happens on the caller's thread. The engine marshals actions, queries and
/// received sync packets onto the same task that ticks frames.
pub struct Scheduler {
    pub(super) sink: Box<dyn OutputSink>,
    pub(super) playlists: Vec<Playlist>,
    pub(super) active: Vec<RunningSchedule>,
    pub(super) immediate: Option<Playlist>,
    pub(super) queued: Playlist,
    pub(super) background: Option<Playlist>,
    pub(super) compositor: FrameCompositor,
    pub(super) options: ScheduleOptions,
    pub(super) registry: CommandRegistry,
    pub(super) sync: SyncSession,
    mode: SyncMode,
    sync_local_ip: IpAddr,
    sync_port: u16,
    pub(super) brightness: u8,
    pub(super) volume: u8,
    saved_volume: u8,
    show_dir: PathBuf,
    store: Option<Box<dyn ScheduleStore>>,
    created_at: DateTime<Utc>,
    pub(super) change_count: u64,
    last_saved_change_count: u64,
    pub(super) selected_playlist: Option<u32>,
    pub(super) selected_schedule: Option<u32>,
    started: Instant,
}

/// Resolve a tier to its playlist. Takes the fields separately so the compositor and sync
/// session stay borrowable alongside it.
fn tier_playlist<'a>(
    immediate: &'a mut Option<Playlist>,
    queued: &'a mut Playlist,
    active: &'a mut [RunningSchedule],
    tier: Tier,
) -> Option<&'a mut Playlist> {
    match tier {
        Tier::Immediate => immediate.as_mut(),
        Tier::Queued => Some(queued),
        Tier::Scheduled(index) => active.get_mut(index).map(|rs| &mut rs.playlist),
    }
}

impl Scheduler {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        let channels = sink.total_channels();
        Self {
            sink,
            playlists: Vec::new(),
            active: Vec::new(),
            immediate: None,
            queued: Playlist::new(QUEUE_NAME),
            background: None,
            compositor: FrameCompositor::new(channels),
            options: ScheduleOptions::default(),
            registry: CommandRegistry::new(),
            sync: SyncSession::inert(),
            mode: SyncMode::Standalone,
            sync_local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            sync_port: FPP_CTRL_PORT,
            brightness: 100,
            volume: 100,
            saved_volume: 100,
            show_dir: PathBuf::from("."),
            store: None,
            created_at: Utc::now(),
            change_count: 0,
            last_saved_change_count: 0,
            selected_playlist: None,
            selected_schedule: None,
            started: Instant::now(),
        }
    }

    /// Apply runtime settings. Opens the sync socket when the mode asks for it.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.show_dir = settings.show_dir.clone();
        self.brightness = settings.brightness.min(100);
        self.volume = settings.volume.min(100);
        self.sync_port = settings.sync_port;
        self.sync_local_ip = settings.sync_local_ip.parse().unwrap_or_else(|_| {
            log::warn!(
                "Invalid sync local IP '{}', using 0.0.0.0",
                settings.sync_local_ip
            );
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });
        self.options
            .set_send_off_when_not_running(settings.send_off_when_not_running);
        self.set_sync_mode(settings.sync_mode);
    }

    pub fn set_store(&mut self, store: Box<dyn ScheduleStore>) {
        log::info!("Schedule will be saved to {}", store.describe());
        self.store = Some(store);
    }

    /// Replace the whole show with a loaded document.
    pub fn load_document(&mut self, document: ScheduleDocument) {
        self.stop_all();
        self.active.clear();
        self.background = None;

        self.created_at = document.created_at;
        self.playlists = document.playlists;
        self.options = document.options;

        self.compositor.clear_processors();
        for config in &self.options.processors {
            self.compositor.add_processor(config.build());
        }

        if let Some(name) = document.background {
            match self.playlist(&name).map(|p| p.id) {
                Some(id) => {
                    if let Err(e) = self.set_background_playlist(Some(id)) {
                        log::warn!("Unable to set background playlist: {}", e);
                    }
                }
                None => log::warn!("Background playlist '{}' not found", name),
            }
        }

        self.clear_dirty();
        log::info!("Schedule loaded with {} playlists", self.playlists.len());
    }

    pub fn document(&self) -> ScheduleDocument {
        ScheduleDocument {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: self.created_at,
            modified_at: Utc::now(),
            playlists: self.playlists.clone(),
            options: self.options.clone(),
            background: self.background.as_ref().map(|b| b.name.clone()),
        }
    }

    // Playlist library

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    /// Look up a playlist by name, ignoring case.
    pub fn playlist(&self, name: &str) -> Option<&Playlist> {
        self.playlists
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn playlist_by_id(&self, id: u32) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == id)
    }

    pub fn playlist_mut(&mut self, id: u32) -> Option<&mut Playlist> {
        self.playlists.iter_mut().find(|p| p.id == id)
    }

    pub fn add_playlist(&mut self, playlist: Playlist) -> u32 {
        log::info!("Adding playlist {}", playlist.name);
        let id = playlist.id;
        self.playlists.push(playlist);
        self.change_count += 1;
        id
    }

    pub fn remove_playlist(&mut self, id: u32) -> Option<Playlist> {
        let index = self.playlists.iter().position(|p| p.id == id)?;
        let playlist = self.playlists.remove(index);
        log::info!("Deleting playlist {}", playlist.name);
        self.change_count += 1;
        Some(playlist)
    }

    pub fn select(&mut self, playlist: Option<u32>, schedule: Option<u32>) {
        self.selected_playlist = playlist;
        self.selected_schedule = schedule;
    }

    pub fn options(&self) -> &ScheduleOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ScheduleOptions {
        &mut self.options
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn show_dir(&self) -> &Path {
        &self.show_dir
    }

    // Playback state

    /// The tier that owns playback right now, if any.
    pub fn running_tier(&self) -> Option<Tier> {
        if let Some(immediate) = &self.immediate {
            return immediate.is_running().then_some(Tier::Immediate);
        }
        if self.queued.is_running() {
            return (!self.queued.steps.is_empty()).then_some(Tier::Queued);
        }
        self.active
            .iter()
            .position(|rs| rs.playlist.is_running())
            .map(Tier::Scheduled)
    }

    pub fn running_playlist(&self) -> Option<&Playlist> {
        match self.running_tier()? {
            Tier::Immediate => self.immediate.as_ref(),
            Tier::Queued => Some(&self.queued),
            Tier::Scheduled(index) => self.active.get(index).map(|rs| &rs.playlist),
        }
    }

    pub fn running_playlist_mut(&mut self) -> Option<&mut Playlist> {
        let tier = self.running_tier()?;
        tier_playlist(&mut self.immediate, &mut self.queued, &mut self.active, tier)
    }

    pub fn running_schedule(&self) -> Option<&RunningSchedule> {
        match self.running_tier()? {
            Tier::Scheduled(index) => self.active.get(index),
            _ => None,
        }
    }

    pub fn running_schedule_mut(&mut self) -> Option<&mut RunningSchedule> {
        match self.running_tier()? {
            Tier::Scheduled(index) => self.active.get_mut(index),
            _ => None,
        }
    }

    pub fn is_current_playlist_scheduled(&self) -> bool {
        matches!(self.running_tier(), Some(Tier::Scheduled(_)))
    }

    pub fn active_schedules(&self) -> &[RunningSchedule] {
        &self.active
    }

    pub fn immediate(&self) -> Option<&Playlist> {
        self.immediate.as_ref()
    }

    pub fn queued_steps(&self) -> &[PlaylistStep] {
        &self.queued.steps
    }

    pub fn queued_playlist(&self) -> &Playlist {
        &self.queued
    }

    pub fn background(&self) -> Option<&Playlist> {
        self.background.as_ref()
    }

    /// `"Idle"` or `"Playing <step> <position>/<length>"`.
    pub fn status(&self) -> String {
        match self.running_playlist().and_then(Playlist::running_step) {
            Some(step) => format!("Playing {} {}", step.name, step.status()),
            None => "Idle".to_string(),
        }
    }

    fn elapsed_ms(&self) -> u32 {
        // Wraps after ~49 days, same as the sinks' own timestamps.
        self.started.elapsed().as_millis() as u32
    }

    // Frame loop

    /// Produce one frame. `output` false advances playback without touching the sink.
    pub fn frame(&mut self, output: bool) {
        let Some(tier) = self.running_tier() else {
            self.idle_frame(output);
            return;
        };

        if output {
            let channels = self.sink.total_channels();
            self.compositor.begin(channels);
            let timestamp = self.elapsed_ms();
            self.sink.start_frame(timestamp);
        }

        let master = output && self.mode == SyncMode::FppMaster;
        let Some(playlist) =
            tier_playlist(&mut self.immediate, &mut self.queued, &mut self.active, tier)
        else {
            return;
        };

        let done = playlist.frame(self.compositor.buffer_mut(), output);

        if master {
            if let Some(step) = playlist.running_step() {
                let frame_ms = playlist.frame_ms();
                let position = step.position_ms();
                match step.sync_sequence_file() {
                    Some(sequence) => self.sync.send_sync(sequence, position, frame_ms),
                    None => self.sync.stop_sequence(),
                }
                if let Some(media) = step.sync_media_file() {
                    self.sync.send_sync(media, position, frame_ms);
                }
            }
        }
        let fired = playlist.take_fired_command();

        // The queue drops each request once it stops being the running step.
        if tier == Tier::Queued && self.queued.running_step_index() != Some(0) {
            if let Some(front) = self.queued.steps.first().map(|s| s.id) {
                if let Some(step) = self.queued.remove_step(front) {
                    log::info!("Queued step {} finished", step.name);
                }
            }
        }

        self.render_background(output);

        if output {
            self.compositor.finish(self.brightness);
            self.sink.set_channels(0, self.compositor.buffer());
            self.sink.end_frame();
        }

        if done {
            self.sync.stop_all();
            match tier {
                Tier::Immediate => {
                    if let Some(playlist) = self.immediate.take() {
                        log::info!("Playlist {} finished", playlist.name);
                    }
                }
                Tier::Queued => log::info!("Song queue finished"),
                Tier::Scheduled(index) => {
                    if let Some(rs) = self.active.get(index) {
                        log::info!(
                            "Playlist {} finished, schedule {} stays active until it ends",
                            rs.playlist.name,
                            rs.schedule.name
                        );
                    }
                }
            }
        }

        if let Some((command, parameters)) = fired {
            log::info!("Running end of step command '{}' '{}'", command, parameters);
            let response = self.action(&command, &parameters, "");
            if !response.success {
                log::warn!("End of step command '{}' failed: {}", command, response.message);
            }
        }
    }

    /// Nothing is playing. Tell the lights to go dark unless configured otherwise.
    fn idle_frame(&mut self, output: bool) {
        if !output || !self.options.send_off_when_not_running {
            return;
        }

        self.sink.start_frame(0);
        self.sink.all_off();

        let channels = self.sink.total_channels();
        self.compositor.begin(channels);
        let has_background = self.background.is_some();
        self.render_background(true);
        self.compositor.finish_idle(self.brightness);
        if has_background {
            self.sink.set_channels(0, self.compositor.buffer());
        }

        self.sink.end_frame();
    }

    fn render_background(&mut self, output: bool) {
        let Some(background) = self.background.as_mut() else {
            return;
        };
        if !background.is_running() {
            if let Err(e) = background.start(true, false, 0, None) {
                log::warn!("Unable to start background playlist {}: {}", background.name, e);
                self.background = None;
                return;
            }
        }
        background.frame(self.compositor.buffer_mut(), output);
    }

    /// Current length of the frame buffer.
    pub fn buffer_len(&self) -> usize {
        self.compositor.buffer().len()
    }

    pub fn frame_buffer(&self) -> &[u8] {
        self.compositor.buffer()
    }

    pub fn overlays(&self) -> &OverlaySet {
        self.compositor.overlays()
    }

    pub fn add_processor(&mut self, processor: Box<dyn OutputProcessor>) {
        self.compositor.add_processor(processor);
    }

    pub fn add_consumer(&mut self, consumer: Box<dyn FrameConsumer>) {
        self.compositor.add_consumer(consumer);
    }

    // Arbitration

    /// Re-evaluate every schedule against the local clock.
    pub fn check_schedule(&mut self) -> u32 {
        self.check_schedule_at(Local::now().naive_local())
    }

    /// Start newly active schedules, wind down closed ones and decide who plays.
    /// Returns the frame period to tick at.
    pub fn check_schedule_at(&mut self, now: NaiveDateTime) -> u32 {
        if self.mode == SyncMode::FppSlave {
            return DEFAULT_FRAME_MS;
        }

        log::debug!("Checking the schedule at {}", now);

        for playlist in &self.playlists {
            for schedule in &playlist.schedules {
                if !schedule.check_active(now) {
                    continue;
                }
                if self.active.iter().any(|rs| rs.schedule.id == schedule.id) {
                    continue;
                }

                let mut running = RunningSchedule::new(playlist, schedule);
                if let Err(e) = running.start_suspended() {
                    log::warn!(
                        "Schedule {} cannot start playlist {}: {}",
                        schedule.name,
                        playlist.name,
                        e
                    );
                }
                log::info!(
                    "Starting suspended playlist {} due to schedule {}",
                    playlist.name,
                    schedule.name
                );
                self.active.push(running);
            }
        }

        self.active.retain_mut(|rs| {
            if rs.schedule.check_active(now) {
                return true;
            }
            if !rs.playlist.is_running() {
                log::info!(
                    "Removing playlist {} due to schedule {}",
                    rs.playlist.name,
                    rs.schedule.name
                );
                return false;
            }
            if !rs.playlist.is_finishing_up() {
                log::info!(
                    "Telling playlist {} due to schedule {} it is time to finish up",
                    rs.playlist.name,
                    rs.schedule.name
                );
                rs.playlist.jump_to_end_steps_at_end_of_current_step();
            }
            true
        });

        self.arbitrate()
    }

    /// Unsuspend exactly one tier. Equal priorities keep their discovery order.
    pub(super) fn arbitrate(&mut self) -> u32 {
        self.active.sort_by(|a, b| b.priority().cmp(&a.priority()));

        if self.immediate.is_some() {
            suspend_schedules(&mut self.active, "so immediate can play");
            if !self.queued.steps.is_empty()
                && self.queued.is_running()
                && !self.queued.is_suspended()
            {
                log::info!("Suspending queued playlist so immediate can play");
                self.queued.suspend(true);
            }
            return self
                .immediate
                .as_ref()
                .map_or(DEFAULT_FRAME_MS, Playlist::frame_ms);
        }

        if !self.queued.steps.is_empty() {
            suspend_schedules(&mut self.active, "so queued songs can play");
            if !self.queued.is_running() {
                if let Err(e) = self.queued.start(false, false, 0, None) {
                    log::warn!("Unable to start the song queue: {}", e);
                }
            } else if self.queued.is_suspended() {
                log::info!("Unsuspending queued playlist");
                self.queued.suspend(false);
            }
            return self.queued.frame_ms();
        }

        let mut frame_ms = DEFAULT_FRAME_MS;
        let mut first = true;
        for rs in &mut self.active {
            if first {
                if rs.playlist.is_running() {
                    first = false;
                    if rs.playlist.is_suspended() {
                        log::info!(
                            "Unsuspending playlist {} due to schedule {}",
                            rs.playlist.name,
                            rs.schedule.name
                        );
                        frame_ms = rs.playlist.suspend(false);
                    }
                }
            } else if rs.playlist.is_running() && !rs.playlist.is_suspended() {
                log::info!(
                    "Suspending playlist {} due to schedule {}",
                    rs.playlist.name,
                    rs.schedule.name
                );
                rs.playlist.suspend(true);
            }
        }

        log::debug!("Active scheduled playlists: {}", self.active.len());
        frame_ms
    }

    /// Play a copy of the playlist with `id` ahead of everything else.
    /// Returns the frame period to tick at.
    pub fn play_playlist(&mut self, id: u32, options: PlayOptions) -> Result<u32, CommandError> {
        let template = self
            .playlist_by_id(id)
            .ok_or_else(|| CommandError::UnknownPlaylist(id.to_string()))?;
        log::info!("Playing playlist {}", template.name);

        let mut playlist = template.clone();
        playlist
            .start(
                options.looped,
                options.random,
                options.loops,
                options.step.as_deref(),
            )
            .map_err(CommandError::UnableToStart)?;
        if let Some(loops) = options.step_loops {
            if let Some(step) = playlist.running_step_mut() {
                step.set_loops_left(loops);
            }
        }
        if options.force_last {
            playlist.stop_at_end_of_current_step();
        }

        if let Some(mut previous) = self.immediate.take() {
            previous.stop();
        }

        if self.queued.is_running() && !self.queued.is_suspended() {
            log::info!("Suspending queued playlist so immediate can play");
            self.queued.suspend(true);
        }
        suspend_schedules(&mut self.active, "so immediate can play");

        self.immediate = Some(playlist);
        Ok(START_FRAME_MS)
    }

    /// Stop every instance of the playlist with `id`, now or at the end of the current step.
    pub fn stop_playlist(&mut self, id: u32, at_end_of_step: bool) {
        if let Some(immediate) = self.immediate.as_mut().filter(|p| p.id == id) {
            if at_end_of_step {
                immediate.stop_at_end_of_current_step();
            } else {
                self.sync.stop_all();
                immediate.stop();
                self.immediate = None;
            }
        }

        for rs in self
            .active
            .iter_mut()
            .filter(|rs| rs.playlist.id == id && rs.playlist.is_running())
        {
            if at_end_of_step {
                rs.playlist.stop_at_end_of_current_step();
            } else {
                self.sync.stop_all();
                rs.playlist.stop();
            }
        }
    }

    /// Stop whichever tier is playing. The queue is emptied and an immediate playlist dropped.
    pub(super) fn stop_tier(&mut self, tier: Tier) {
        self.sync.stop_all();
        match tier {
            Tier::Immediate => {
                if let Some(mut playlist) = self.immediate.take() {
                    playlist.stop();
                }
            }
            Tier::Queued => {
                self.queued.stop();
                self.queued.remove_all_steps();
            }
            Tier::Scheduled(index) => {
                if let Some(rs) = self.active.get_mut(index) {
                    rs.playlist.stop();
                }
            }
        }
    }

    pub fn stop_all(&mut self) {
        log::info!("Stopping all playlists");
        self.sync.stop_all();

        if let Some(mut immediate) = self.immediate.take() {
            immediate.stop();
        }

        if self.queued.is_running() {
            self.queued.stop();
            self.queued.remove_all_steps();
        }

        for rs in &mut self.active {
            rs.playlist.stop();
        }
    }

    // Sync

    pub fn sync_mode(&self) -> SyncMode {
        self.mode
    }

    /// Switch sync role. Master opens a broadcast socket; if that fails sync is left inert.
    /// Listening as a slave is handled by the engine's sync listener module.
    pub fn set_sync_mode(&mut self, mode: SyncMode) {
        if mode == self.mode && (mode != SyncMode::FppMaster || self.sync.is_active()) {
            return;
        }
        log::info!("Sync mode {} -> {}", self.mode, mode);
        self.mode = mode;

        match mode {
            SyncMode::FppMaster => {
                match UdpBroadcastTransport::open(self.sync_local_ip, self.sync_port) {
                    Ok(transport) => self.sync.set_transport(Some(Box::new(transport))),
                    Err(e) => {
                        log::error!("Unable to open FPP sync socket, sync disabled: {}", e);
                        self.sync.set_transport(None);
                    }
                }
            }
            SyncMode::FppSlave | SyncMode::Standalone => self.sync.set_transport(None),
        }
    }

    /// Act as master writing to `transport` instead of a UDP socket.
    pub fn set_master_transport(&mut self, transport: Box<dyn SyncTransport>) {
        self.mode = SyncMode::FppMaster;
        self.sync.set_transport(Some(transport));
    }

    pub fn sync_packets_sent(&self) -> u64 {
        self.sync.packets_sent()
    }

    /// Follow a master. Only sequence packets are acted on; media packets are accepted and
    /// ignored. Returns a new frame period when playback was started.
    pub fn handle_sync_packet(&mut self, packet: &SyncPacket) -> Option<u32> {
        if packet.file_type != SyncFileType::Sequence {
            log::debug!("Ignoring media sync for {}", packet.filename);
            return None;
        }

        match packet.action {
            SyncAction::Start => {
                log::debug!("Remote start {}", packet.filename);
                self.start_fseq(&packet.filename)
            }
            SyncAction::Stop => {
                log::debug!("Remote stop {}", packet.filename);
                let tier = self.running_tier()?;
                let matches = self
                    .running_playlist()
                    .and_then(Playlist::running_step)
                    .is_some_and(|step| step.is_running_sequence(&packet.filename));
                if matches {
                    log::debug!("Stopping {}", packet.filename);
                    self.stop_tier(tier);
                }
                None
            }
            SyncAction::Sync => {
                let mut rate = None;
                if self.running_tier().is_none() {
                    rate = self.start_fseq(&packet.filename);
                }
                let ms = (packet.seconds.max(0.0) * 1000.0) as u32;
                if let Some(step) = self
                    .running_playlist_mut()
                    .and_then(Playlist::running_step_mut)
                {
                    if step.is_running_sequence(&packet.filename) {
                        step.set_sync_position(packet.frame, ms);
                    }
                }
                rate
            }
        }
    }

    /// Find the step playing `fseq` and play just that step. The running playlist is searched
    /// first, then every playlist in order.
    pub fn start_fseq(&mut self, fseq: &str) -> Option<u32> {
        let mut found = None;

        if let Some(tier) = self.running_tier() {
            if let Some(playlist) = self.running_playlist() {
                found = playlist
                    .step_with_sequence(fseq)
                    .map(|step| (playlist.id, step.name.clone()))
                    .filter(|(id, _)| self.playlist_by_id(*id).is_some());
            }
            self.stop_tier(tier);
        }

        if found.is_none() {
            found = self.playlists.iter().find_map(|playlist| {
                playlist
                    .step_with_sequence(fseq)
                    .map(|step| (playlist.id, step.name.clone()))
            });
        }

        let Some((id, step)) = found else {
            log::debug!("No step plays {}", fseq);
            return None;
        };

        let options = PlayOptions {
            force_last: true,
            ..PlayOptions::from_step(step)
        };
        match self.play_playlist(id, options) {
            Ok(rate) => Some(rate),
            Err(e) => {
                log::warn!("Unable to start {}: {}", fseq, e);
                None
            }
        }
    }

    // Output, background, volume, brightness

    pub fn is_output_to_lights(&self) -> bool {
        self.sink.is_outputting()
    }

    /// Returns false when output could not be started.
    pub fn set_output_to_lights(&mut self, on: bool) -> bool {
        if on == self.sink.is_outputting() {
            return true;
        }
        if on {
            if !self.sink.start_output() {
                log::error!("Unable to start output to lights");
                return false;
            }
            log::info!("Output to lights on");
        } else {
            self.sink.stop_output();
            log::info!("Output to lights off");
        }
        self.manage_background();
        true
    }

    pub fn toggle_output_to_lights(&mut self) -> bool {
        let on = !self.sink.is_outputting();
        self.set_output_to_lights(on)
    }

    /// Use a copy of the playlist with `id` as the background, or clear it.
    pub fn set_background_playlist(&mut self, id: Option<u32>) -> Result<(), CommandError> {
        match id {
            None => {
                if let Some(mut background) = self.background.take() {
                    background.stop();
                    self.change_count += 1;
                }
            }
            Some(id) => {
                if self.background.as_ref().is_some_and(|b| b.id == id) {
                    return Ok(());
                }
                let template = self
                    .playlist_by_id(id)
                    .ok_or_else(|| CommandError::UnknownPlaylist(id.to_string()))?
                    .clone();
                log::info!("Background playlist set to {}", template.name);
                if let Some(mut previous) = self.background.replace(template) {
                    previous.stop();
                }
                self.change_count += 1;
            }
        }
        Ok(())
    }

    /// Restart the background from a fresh copy when output is on, stop it when off.
    pub fn manage_background(&mut self) {
        let Some(mut background) = self.background.take() else {
            return;
        };
        background.stop();

        if !self.sink.is_outputting() {
            self.background = Some(background);
            return;
        }

        match self.playlist_by_id(background.id).cloned() {
            Some(mut fresh) => {
                if let Err(e) = fresh.start(true, false, 0, None) {
                    log::warn!("Unable to start background playlist {}: {}", fresh.name, e);
                }
                self.background = Some(fresh);
            }
            None => log::warn!("Background playlist {} no longer exists", background.name),
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, 100) as u8;
        log::debug!("Volume {}", self.volume);
    }

    pub fn adjust_volume(&mut self, delta: i32) {
        self.set_volume(self.volume as i32 + delta);
    }

    pub fn toggle_mute(&mut self) {
        if self.volume > 0 {
            self.saved_volume = self.volume;
            self.set_volume(0);
        } else {
            self.set_volume(self.saved_volume as i32);
        }
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn set_brightness(&mut self, brightness: i32) {
        self.brightness = brightness.clamp(0, 100) as u8;
        log::debug!("Brightness {}%", self.brightness);
    }

    pub fn adjust_brightness(&mut self, delta: i32) {
        self.set_brightness(self.brightness as i32 + delta);
    }

    // Persistence

    pub fn is_dirty(&self) -> bool {
        self.change_count != self.last_saved_change_count
            || self.playlists.iter().any(Playlist::is_dirty)
            || self.options.is_dirty()
    }

    pub fn clear_dirty(&mut self) {
        self.last_saved_change_count = self.change_count;
        for playlist in &mut self.playlists {
            playlist.clear_dirty();
        }
        self.options.clear_dirty();
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        let document = self.document();
        let store = self.store.as_mut().ok_or(StoreError::NotConfigured)?;
        store.save(&document)?;
        self.clear_dirty();
        Ok(())
    }
}

fn suspend_schedules(active: &mut [RunningSchedule], reason: &str) {
    for rs in active {
        if rs.playlist.is_running() && !rs.playlist.is_suspended() {
            log::info!(
                "Suspending playlist {} due to schedule {} {}",
                rs.playlist.name,
                rs.schedule.name,
                reason
            );
            rs.playlist.suspend(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use crate::sync::MemoryTransport;
    use chrono::NaiveDate;
    use marquee_show::{PlaylistItem, Schedule};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, 20)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn scheduler(channels: usize) -> (Scheduler, MemorySink) {
        let sink = MemorySink::new(channels);
        (Scheduler::new(Box::new(sink.clone())), sink)
    }

    /// A one step playlist filling `channels` with `value` for `frames` 50ms frames.
    fn solid(name: &str, value: u8, channels: usize, frames: usize) -> Playlist {
        Playlist::new(name).with_step(
            PlaylistStep::new(format!("{} step", name)).with_item(PlaylistItem::sequence(
                format!("{}.fseq", name.to_lowercase()),
                50,
                vec![vec![value; channels]; frames],
            )),
        )
    }

    #[test]
    fn test_idle_frame_sends_all_off() {
        let (mut scheduler, sink) = scheduler(8);
        scheduler.frame(true);

        assert_eq!(sink.all_off_count(), 1);
        assert_eq!(sink.last_frame().unwrap().data, vec![0; 8]);
        assert_eq!(scheduler.status(), "Idle");
    }

    #[test]
    fn test_idle_frame_can_be_silent() {
        let (mut scheduler, sink) = scheduler(8);
        scheduler.options_mut().set_send_off_when_not_running(false);
        scheduler.frame(true);
        assert_eq!(sink.frame_count(), 0);
    }

    #[test]
    fn test_immediate_play_renders_and_finishes() {
        let (mut scheduler, sink) = scheduler(4);
        let id = scheduler.add_playlist(solid("Carols", 200, 4, 2));

        assert_eq!(scheduler.play_playlist(id, PlayOptions::default()), Ok(START_FRAME_MS));
        assert_eq!(scheduler.running_tier(), Some(Tier::Immediate));

        scheduler.frame(true);
        assert_eq!(sink.last_frame().unwrap().data, vec![200; 4]);
        scheduler.frame(true);
        assert!(scheduler.immediate().is_none());
        assert_eq!(scheduler.running_tier(), None);
    }

    #[test]
    fn test_brightness_scales_output() {
        let (mut scheduler, sink) = scheduler(2);
        let id = scheduler.add_playlist(solid("Carols", 200, 2, 5));
        scheduler.set_brightness(50);
        scheduler.play_playlist(id, PlayOptions::default()).unwrap();

        scheduler.frame(true);
        assert_eq!(sink.last_frame().unwrap().data, vec![100, 100]);

        scheduler.set_brightness(150);
        assert_eq!(scheduler.brightness(), 100);
    }

    #[test]
    fn test_schedule_priority_arbitration() {
        let (mut scheduler, _sink) = scheduler(4);
        let mut low = solid("Low", 1, 4, 100);
        low.schedules.push(Schedule::always("low", 3).unwrap());
        let mut first = solid("First", 2, 4, 100);
        first.schedules.push(Schedule::always("first", 5).unwrap());
        let mut second = solid("Second", 3, 4, 100);
        second.schedules.push(Schedule::always("second", 5).unwrap());
        scheduler.add_playlist(low);
        scheduler.add_playlist(first);
        scheduler.add_playlist(second);

        scheduler.check_schedule_at(at(20, 0));

        let unsuspended: Vec<&str> = scheduler
            .active_schedules()
            .iter()
            .filter(|rs| !rs.playlist.is_suspended())
            .map(|rs| rs.schedule.name.as_str())
            .collect();
        assert_eq!(unsuspended, vec!["first"]);
        assert_eq!(scheduler.active_schedules().len(), 3);
        assert_eq!(scheduler.running_schedule().unwrap().schedule.name, "first");
    }

    #[test]
    fn test_slave_mode_skips_schedules() {
        let (mut scheduler, _sink) = scheduler(4);
        let mut playlist = solid("Carols", 1, 4, 10);
        playlist.schedules.push(Schedule::always("always", 1).unwrap());
        scheduler.add_playlist(playlist);
        scheduler.set_sync_mode(SyncMode::FppSlave);

        assert_eq!(scheduler.check_schedule_at(at(20, 0)), DEFAULT_FRAME_MS);
        assert!(scheduler.active_schedules().is_empty());
    }

    #[test]
    fn test_master_sends_start_then_stop() {
        let (mut scheduler, _sink) = scheduler(4);
        let transport = MemoryTransport::new();
        scheduler.set_master_transport(Box::new(transport.clone()));
        let id = scheduler.add_playlist(solid("Carols", 9, 4, 2));
        scheduler.play_playlist(id, PlayOptions::default()).unwrap();

        scheduler.frame(true);
        scheduler.frame(true);

        let actions: Vec<SyncAction> = transport
            .sent()
            .iter()
            .map(|b| SyncPacket::decode(b).unwrap().action)
            .collect();
        assert_eq!(actions.first(), Some(&SyncAction::Start));
        assert_eq!(actions.last(), Some(&SyncAction::Stop));
    }

    #[test]
    fn test_background_plays_when_idle() {
        let (mut scheduler, sink) = scheduler(3);
        let id = scheduler.add_playlist(solid("Glow", 30, 3, 4));
        scheduler.set_background_playlist(Some(id)).unwrap();
        assert!(scheduler.is_dirty());

        scheduler.frame(true);
        assert_eq!(sink.last_frame().unwrap().data, vec![30; 3]);
        assert!(scheduler.background().unwrap().is_running());

        scheduler.set_output_to_lights(false);
        assert!(!scheduler.background().unwrap().is_running());
    }

    #[test]
    fn test_save_without_store() {
        let (mut scheduler, _sink) = scheduler(3);
        scheduler.add_playlist(solid("Glow", 30, 3, 4));
        assert!(matches!(scheduler.save(), Err(StoreError::NotConfigured)));
        assert!(scheduler.is_dirty());
    }
}
