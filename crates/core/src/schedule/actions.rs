use marquee_show::Playlist;

use crate::command::{ActionOutcome, ActionResponse, Command, CommandError, StopWhen};

use super::scheduler::{PlayOptions, Scheduler, Tier};

impl Scheduler {
    /// Run a named command. Failures come back in the response; nothing is raised.
    /// `data` carries bulk payloads such as base64 pixel data.
    pub fn action(&mut self, command: &str, parameters: &str, data: &str) -> ActionResponse {
        let result = self
            .registry
            .parse(command, parameters)
            .and_then(|parsed| self.execute(parsed, data));

        if let Err(e) = &result {
            log::warn!("Action '{}' '{}' failed: {}", command, parameters, e);
        }
        ActionResponse::from_result(result)
    }

    /// Run a typed command.
    pub fn execute(&mut self, command: Command, data: &str) -> Result<ActionOutcome, CommandError> {
        log::debug!("Executing {:?}", command);
        let result = self.dispatch(command, data);

        // An action may have stopped the immediate playlist without dropping it.
        if self.immediate.as_ref().is_some_and(|p| !p.is_running()) {
            self.immediate = None;
        }
        result
    }

    fn dispatch(&mut self, command: Command, data: &str) -> Result<ActionOutcome, CommandError> {
        let mut outcome = ActionOutcome::default();

        match command {
            Command::StopAll => self.stop_all(),
            Command::Stop => {
                if let Some(tier) = self.running_tier() {
                    self.stop_tier(tier);
                }
            }

            Command::PlaySelected { looped } => {
                let id = self.selected_playlist.ok_or(CommandError::NothingSelected)?;
                outcome = ActionOutcome::rate(self.play_playlist(id, PlayOptions::looped(looped))?);
            }
            Command::PlayPlaylist { playlist, looped } => {
                let id = self.template_id(&playlist)?;
                outcome = ActionOutcome::rate(self.play_playlist(id, PlayOptions::looped(looped))?);
            }
            Command::PlayPlaylistTimes { playlist, loops } => {
                let id = self.template_id(&playlist)?;
                let options = PlayOptions {
                    loops,
                    ..PlayOptions::default()
                };
                outcome = ActionOutcome::rate(self.play_playlist(id, options)?);
            }
            Command::PlayFromStep {
                playlist,
                step,
                looped,
            } => {
                let id = self.template_step(&playlist, &step)?;
                let options = PlayOptions {
                    looped,
                    ..PlayOptions::from_step(step)
                };
                outcome = ActionOutcome::rate(self.play_playlist(id, options)?);
            }
            Command::PlayStepOnce { playlist, step } => {
                let id = self.template_step(&playlist, &step)?;
                let options = PlayOptions {
                    force_last: true,
                    ..PlayOptions::from_step(step)
                };
                outcome = ActionOutcome::rate(self.play_playlist(id, options)?);
            }
            Command::PlayStepTimes {
                playlist,
                step,
                loops,
            } => {
                let id = self.template_step(&playlist, &step)?;
                let options = PlayOptions {
                    step_loops: Some(loops),
                    ..PlayOptions::from_step(step)
                };
                outcome = ActionOutcome::rate(self.play_playlist(id, options)?);
            }
            Command::PlayStepLooped { playlist, step } => {
                let id = self.template_step(&playlist, &step)?;
                let rate = self.play_playlist(id, PlayOptions::from_step(step.clone()))?;
                if let Some(immediate) = self.immediate.as_mut() {
                    immediate.loop_step(&step);
                }
                outcome = ActionOutcome::rate(rate);
            }

            Command::StopPlaylist { playlist, when } => {
                let id = self.template_id(&playlist)?;
                match when {
                    StopWhen::Now => self.stop_playlist(id, false),
                    StopWhen::EndOfStep => self.stop_playlist(id, true),
                    StopWhen::EndOfLoop => {
                        if let Some(immediate) = self.immediate.as_mut().filter(|p| p.id == id) {
                            immediate.stop_at_end_of_this_loop();
                        }
                        for rs in self.active.iter_mut().filter(|rs| rs.playlist.id == id) {
                            rs.playlist.stop_at_end_of_this_loop();
                        }
                    }
                }
            }
            Command::StopCurrent(when) => {
                if let Some(playlist) = self.running_playlist_mut() {
                    match when {
                        StopWhen::Now => playlist.stop(),
                        StopWhen::EndOfStep => playlist.stop_at_end_of_current_step(),
                        StopWhen::EndOfLoop => playlist.stop_at_end_of_this_loop(),
                    }
                }
            }
            Command::JumpToEndSteps => {
                if let Some(playlist) = self.running_playlist_mut() {
                    playlist.jump_to_end_steps_at_end_of_current_step();
                }
            }

            Command::Pause => self.current_mut()?.pause(),
            Command::NextStep => {
                if self.running_tier() == Some(Tier::Queued) {
                    // Skipping a queued song discards it.
                    self.queued.stop();
                    if let Some(front) = self.queued.steps.first().map(|s| s.id) {
                        self.queued.remove_step(front);
                    }
                    if !self.queued.steps.is_empty() {
                        self.queued
                            .start(false, false, 0, None)
                            .map_err(CommandError::UnableToStart)?;
                    }
                    outcome = ActionOutcome::rate(self.queued.frame_ms());
                } else if let Some(playlist) = self.running_playlist_mut() {
                    outcome = ActionOutcome::rate(playlist.jump_to_next_step());
                }
            }
            Command::PriorStep => {
                if let Some(playlist) = self.running_playlist_mut() {
                    outcome = ActionOutcome::rate(playlist.jump_to_prior_step());
                }
            }
            Command::RestartStep => {
                if let Some(playlist) = self.running_playlist_mut() {
                    playlist.restart_current_step();
                }
            }
            Command::JumpToStep {
                step,
                at_end_of_step,
            } => {
                if let Some(playlist) = self.running_playlist_mut() {
                    if playlist.step(&step).is_none() {
                        return Err(CommandError::UnknownStep(step));
                    }
                    if at_end_of_step {
                        playlist.jump_to_step_at_end_of_current_step(&step);
                    } else {
                        outcome = ActionOutcome::rate(playlist.jump_to_step(&step));
                    }
                }
            }
            Command::JumpToRandomStep { playlist } => {
                let target = match playlist {
                    None => self.running_playlist_mut(),
                    Some(name) => {
                        let id = self.template_id(&name)?;
                        self.running_instance_mut(id)
                    }
                };
                if let Some(playlist) = target {
                    if let Some(name) = playlist.random_step().map(|s| s.name.clone()) {
                        outcome = ActionOutcome::rate(playlist.jump_to_step(&name));
                    }
                }
            }
            Command::ToggleStepLoop => {
                let playlist = self.current_mut()?;
                if playlist.is_step_looping() {
                    playlist.clear_step_looping();
                } else {
                    let name = playlist
                        .running_step()
                        .map(|s| s.name.clone())
                        .ok_or(CommandError::CannotLoopStep)?;
                    if !playlist.loop_step(&name) {
                        return Err(CommandError::CannotLoopStep);
                    }
                }
            }
            Command::ToggleRandom => {
                let playlist = self.current_mut()?;
                let random = !playlist.is_random();
                playlist.set_random(random);
            }
            Command::ToggleLoop => {
                let playlist = self.current_mut()?;
                let looping = !playlist.is_looping();
                playlist.set_looping(looping);
            }

            Command::EnqueueStep { playlist, step } => {
                let template = self
                    .playlist(&playlist)
                    .ok_or_else(|| CommandError::UnknownPlaylist(playlist.clone()))?;
                let step = template
                    .step(&step)
                    .cloned()
                    .ok_or(CommandError::UnknownStep(step))?;
                if self.queued.steps.last().is_some_and(|last| last.id == step.id) {
                    return Err(CommandError::DuplicateQueuedStep);
                }

                log::info!("Queueing step {}", step.name);
                self.queued.add_step(step);
                if !self.queued.is_running() {
                    self.queued
                        .start_suspended(false, false, 0, None)
                        .map_err(CommandError::UnableToStart)?;
                }
                outcome = ActionOutcome::rate(self.arbitrate());
            }
            Command::ClearQueue => {
                if self.queued.is_running() {
                    self.queued.stop();
                }
                self.queued.remove_all_steps();
                self.sync.stop_all();
                outcome = ActionOutcome::rate(self.arbitrate());
            }

            Command::AddMinutesToSchedule(minutes) => {
                if let Some(rs) = self.running_schedule_mut() {
                    log::info!("Extending schedule {} by {} minutes", rs.schedule.name, minutes);
                    rs.schedule.add_mins_to_end_time(minutes);
                }
            }
            Command::RestartSchedule { schedule } => {
                let index = match &schedule {
                    Some(name) => self
                        .active
                        .iter()
                        .position(|rs| rs.schedule.name.eq_ignore_ascii_case(name)),
                    None => self
                        .selected_schedule
                        .and_then(|id| self.active.iter().position(|rs| rs.schedule.id == id))
                        .or_else(|| match self.running_tier() {
                            Some(Tier::Scheduled(index)) => Some(index),
                            _ => None,
                        }),
                };
                if let Some(rs) = index.and_then(|i| self.active.get_mut(i)) {
                    log::info!("Restarting schedule {}", rs.schedule.name);
                    rs.reset().map_err(CommandError::UnableToStart)?;
                    outcome = ActionOutcome::rate(self.arbitrate());
                }
            }

            Command::SetVolume(volume) => self.set_volume(volume),
            Command::AdjustVolume(delta) => self.adjust_volume(delta),
            Command::ToggleMute => self.toggle_mute(),
            Command::SetBrightness(brightness) => self.set_brightness(brightness),
            Command::AdjustBrightness(delta) => self.adjust_brightness(delta),
            Command::ToggleOutputToLights => {
                if !self.toggle_output_to_lights() {
                    return Err(CommandError::OutputUnavailable);
                }
            }

            Command::SetPixels {
                start_channel,
                blend,
            } => {
                self.compositor
                    .overlays_mut()
                    .set(start_channel, data, blend)
                    .map_err(|e| CommandError::InvalidOverlay(e.to_string()))?;
            }

            Command::RefreshCurrentPlaylist => outcome = self.refresh_current_playlist()?,
            Command::SaveSchedule => {
                self.save()
                    .map_err(|e| CommandError::SaveFailed(e.to_string()))?;
            }
            Command::RunCommandAtEndOfStep {
                command,
                parameters,
            } => {
                if let Some(playlist) = self.running_playlist_mut() {
                    playlist.set_command_at_end_of_current_step(&command, &parameters);
                }
            }
            Command::PressButton(label) => {
                let button = self
                    .options
                    .button(&label)
                    .cloned()
                    .ok_or_else(|| CommandError::UnknownButton(label.clone()))?;
                if button.command.is_empty() {
                    return Ok(outcome);
                }
                let parsed = self.registry.parse(&button.command, &button.parameters)?;
                if matches!(parsed, Command::PressButton(_)) {
                    return Err(CommandError::ButtonLoop(label));
                }
                log::info!("Button {} pressed", button.label);
                outcome = self.dispatch(parsed, "")?;
            }
        }

        Ok(outcome)
    }

    /// Replay the running playlist from fresh copies of its definition, keeping the current
    /// step, loop state and random flag. Picks up edits made while it was playing.
    fn refresh_current_playlist(&mut self) -> Result<ActionOutcome, CommandError> {
        match self.running_tier() {
            Some(Tier::Scheduled(index)) => {
                let rs = self.active.remove(index);
                let playlist = &rs.playlist;
                let looping = playlist.is_looping();
                let random = playlist.is_random();
                let loops_left = playlist.loops_left();
                let step = playlist.running_step().map(|s| s.name.clone());
                self.sync.stop_all();

                let template = self.playlist_by_id(playlist.id);
                let schedule = template.and_then(|t| {
                    t.schedules.iter().find(|s| s.id == rs.schedule.id)
                });
                if let (Some(template), Some(schedule)) = (template, schedule) {
                    let mut fresh = super::RunningSchedule::new(template, schedule);
                    fresh
                        .playlist
                        .start_suspended(looping, random, loops_left + 1, step.as_deref())
                        .map_err(CommandError::UnableToStart)?;
                    log::info!("Refreshed playlist {}", fresh.playlist.name);
                    self.active.push(fresh);
                } else {
                    log::warn!(
                        "Playlist {} or schedule {} no longer exists",
                        rs.playlist.name,
                        rs.schedule.name
                    );
                }
                Ok(ActionOutcome::rate(self.arbitrate()))
            }
            Some(Tier::Immediate) => {
                let Some(mut playlist) = self.immediate.take() else {
                    return Err(CommandError::CannotRefresh);
                };
                let options = PlayOptions {
                    looped: playlist.is_looping(),
                    random: playlist.is_random(),
                    loops: playlist.loops_left() + 1,
                    step: playlist.running_step().map(|s| s.name.clone()),
                    force_last: playlist.is_finishing_up(),
                    step_loops: playlist.running_step().map(|s| s.loops_left()),
                };
                playlist.stop();
                self.sync.stop_all();
                Ok(ActionOutcome::rate(self.play_playlist(playlist.id, options)?))
            }
            _ => Err(CommandError::CannotRefresh),
        }
    }

    fn current_mut(&mut self) -> Result<&mut Playlist, CommandError> {
        self.running_playlist_mut()
            .ok_or(CommandError::NothingPlaying)
    }

    fn template_id(&self, name: &str) -> Result<u32, CommandError> {
        self.playlist(name)
            .map(|p| p.id)
            .ok_or_else(|| CommandError::UnknownPlaylist(name.to_string()))
    }

    fn template_step(&self, playlist: &str, step: &str) -> Result<u32, CommandError> {
        let template = self
            .playlist(playlist)
            .ok_or_else(|| CommandError::UnknownPlaylist(playlist.to_string()))?;
        if template.step(step).is_none() {
            return Err(CommandError::UnknownStep(step.to_string()));
        }
        Ok(template.id)
    }

    /// The running copy of the playlist with `id`, if one is playing.
    fn running_instance_mut(&mut self, id: u32) -> Option<&mut Playlist> {
        if let Some(immediate) = self.immediate.as_mut().filter(|p| p.id == id) {
            return Some(immediate);
        }
        self.active
            .iter_mut()
            .map(|rs| &mut rs.playlist)
            .find(|p| p.id == id && p.is_running())
    }
}
