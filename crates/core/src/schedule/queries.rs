use chrono::{Local, NaiveDateTime};
use marquee_show::{format_time, Playlist, Schedule};
use serde_json::{json, Map, Value};

use crate::command::{CommandError, Query, QueryResponse};

use super::scheduler::{Scheduler, Tier};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TRIGGER_FORMAT: &str = "%Y-%m-%d %H:%M";

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl Scheduler {
    /// Answer a read-only query. `ip` is the caller's address and is echoed by status replies.
    pub fn query(&self, name: &str, parameters: &str, ip: &str, reference: &str) -> QueryResponse {
        self.query_at(Local::now().naive_local(), name, parameters, ip, reference)
    }

    pub fn query_at(
        &self,
        now: NaiveDateTime,
        name: &str,
        parameters: &str,
        ip: &str,
        reference: &str,
    ) -> QueryResponse {
        let query = match Query::parse(name, parameters) {
            Ok(query) => query,
            Err(e) => {
                log::debug!("Rejected query '{}': {}", name, e);
                return QueryResponse::error(&e, reference);
            }
        };

        match query {
            Query::PlayLists => {
                let playlists: Vec<Value> = self
                    .playlists
                    .iter()
                    .map(|p| {
                        json!({
                            "name": p.name,
                            "id": p.id.to_string(),
                            "nextscheduled": next_scheduled(p, now),
                            "length": format_time(p.length_ms()),
                        })
                    })
                    .collect();
                QueryResponse::ok(json!({ "playlists": playlists, "reference": reference }))
            }
            Query::PlayListSteps { playlist } => match self.playlist(&playlist) {
                Some(p) => {
                    let last = p.steps.len().saturating_sub(1);
                    let steps: Vec<Value> = p
                        .steps
                        .iter()
                        .enumerate()
                        .map(|(i, s)| {
                            json!({
                                "name": s.name,
                                "id": s.id.to_string(),
                                "startonly": flag(i == 0 && p.first_once),
                                "endonly": flag(i == last && p.last_once),
                                "length": format_time(s.length_ms()),
                            })
                        })
                        .collect();
                    QueryResponse::ok(json!({ "steps": steps, "reference": reference }))
                }
                None => QueryResponse::failed(
                    CommandError::UnknownPlaylist(playlist).to_string(),
                    json!({ "steps": [], "reference": reference }),
                ),
            },
            Query::QueuedSteps => {
                let steps: Vec<Value> = self
                    .queued
                    .steps
                    .iter()
                    .map(|s| {
                        json!({
                            "name": s.name,
                            "id": s.id.to_string(),
                            "length": format_time(s.length_ms()),
                        })
                    })
                    .collect();
                QueryResponse::ok(json!({ "steps": steps, "reference": reference }))
            }
            Query::PlayingStatus => QueryResponse::ok(self.playing_status(now, ip, reference)),
            Query::NextScheduledPlayList => {
                let next = self
                    .playlists
                    .iter()
                    .filter_map(|p| p.next_scheduled(now).map(|(s, at)| (p, s, at)))
                    .min_by_key(|(_, _, at)| *at);
                let data = match next {
                    Some((playlist, schedule, at)) => json!({
                        "playlistname": playlist.name,
                        "playlistid": playlist.id.to_string(),
                        "schedulename": schedule.name,
                        "scheduleid": schedule.id.to_string(),
                        "start": at.format(TRIGGER_FORMAT).to_string(),
                        "end": schedule.end_time.format("%H:%M").to_string(),
                        "reference": reference,
                    }),
                    None => json!({
                        "playlistname": "",
                        "playlistid": "",
                        "schedulename": "",
                        "scheduleid": "",
                        "start": "Never",
                        "end": "",
                        "reference": reference,
                    }),
                };
                QueryResponse::ok(data)
            }
            Query::PlayListSchedules { playlist } => match self.playlist(&playlist) {
                Some(p) => {
                    let schedules: Vec<Value> = p.schedules.iter().map(schedule_json).collect();
                    QueryResponse::ok(json!({ "schedules": schedules, "reference": reference }))
                }
                None => QueryResponse::failed(
                    CommandError::UnknownPlaylist(playlist).to_string(),
                    json!({ "schedules": [], "reference": reference }),
                ),
            },
            Query::PlayListSchedule { playlist, schedule } => {
                let Some(p) = self.playlist(&playlist) else {
                    return QueryResponse::error(&CommandError::UnknownPlaylist(playlist), reference);
                };
                match p.schedule(&schedule) {
                    Some(s) => {
                        let mut data = schedule_json(s);
                        if let Value::Object(fields) = &mut data {
                            fields.insert("reference".to_string(), Value::from(reference));
                        }
                        QueryResponse::ok(data)
                    }
                    None => QueryResponse::error(
                        &CommandError::UnknownSchedule { playlist, schedule },
                        reference,
                    ),
                }
            }
            Query::Buttons => QueryResponse::ok(self.options.buttons_json(reference)),
        }
    }

    fn playing_status(&self, now: NaiveDateTime, ip: &str, reference: &str) -> Value {
        let output = flag(self.is_output_to_lights());
        let volume = self.volume.to_string();
        let time = now.format(TIME_FORMAT).to_string();

        let tier = self.running_tier();
        let playing = self
            .running_playlist()
            .and_then(|p| p.running_step().map(|s| (p, s)));
        let Some((playlist, step)) = playing else {
            return json!({
                "status": "idle",
                "outputtolights": output,
                "volume": volume,
                "ip": ip,
                "reference": reference,
                "time": time,
            });
        };

        let (next_step, next_step_id) = match playlist.next_step() {
            _ if playlist.is_random() => ("God knows".to_string(), String::new()),
            Some((next, _)) => (next.name.clone(), next.id.to_string()),
            None => (String::new(), String::new()),
        };

        let trigger = match tier {
            Some(Tier::Scheduled(_)) => "scheduled",
            Some(Tier::Immediate) => "manual",
            _ => "queued",
        };
        let (schedule_name, schedule_end, schedule_id) = match self.running_schedule() {
            Some(rs) => (
                rs.schedule.name.clone(),
                rs.schedule
                    .next_end(now)
                    .map(|end| end.format("%H:%M").to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
                rs.schedule.id.to_string(),
            ),
            None => ("N/A".to_string(), "N/A".to_string(), "N/A".to_string()),
        };

        let position = step.position_ms().min(step.length_ms());
        json!({
            "status": if playlist.is_paused() { "paused" } else { "playing" },
            "playlist": playlist.name,
            "playlistid": playlist.id.to_string(),
            "playlistlooping": flag(playlist.is_looping() || playlist.loops_left() > 0),
            "playlistloopsleft": playlist.loops_left().to_string(),
            "random": flag(playlist.is_random()),
            "step": step.name,
            "stepid": step.id.to_string(),
            "steplooping": flag(playlist.is_step_looping() || step.loops_left() > 0),
            "steploopsleft": step.loops_left().to_string(),
            "length": format_time(step.length_ms()),
            "position": format_time(position),
            "left": format_time(step.length_ms() - position),
            "trigger": trigger,
            "schedulename": schedule_name,
            "scheduleend": schedule_end,
            "scheduleid": schedule_id,
            "nextstep": next_step,
            "nextstepid": next_step_id,
            "version": env!("CARGO_PKG_VERSION"),
            "queuelength": self.queued.steps.len().to_string(),
            "volume": volume,
            "time": time,
            "ip": ip,
            "reference": reference,
            "outputtolights": output,
        })
    }
}

fn next_scheduled(playlist: &Playlist, now: NaiveDateTime) -> String {
    playlist
        .next_scheduled(now)
        .map(|(_, at)| at.format(TRIGGER_FORMAT).to_string())
        .unwrap_or_else(|| "Never".to_string())
}

fn schedule_json(schedule: &Schedule) -> Value {
    match serde_json::to_value(schedule) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Unable to serialize schedule {}: {}", schedule.name, e);
            Value::Object(Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use crate::schedule::{PlayOptions, UserButton};
    use chrono::{NaiveDate, NaiveTime};
    use marquee_show::{PlaylistItem, PlaylistStep};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, 20)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn scheduler() -> Scheduler {
        let mut scheduler = Scheduler::new(Box::new(MemorySink::new(4)));
        let mut carols = Playlist::new("Carols")
            .with_step(PlaylistStep::new("Intro").with_item(PlaylistItem::delay(1000)))
            .with_step(PlaylistStep::new("Jingle").with_item(PlaylistItem::media("jingle.mp3", 2500)))
            .with_schedule(
                Schedule::new(
                    "Evenings",
                    2,
                    NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                )
                .unwrap(),
            );
        carols.first_once = true;
        scheduler.add_playlist(carols);
        scheduler
    }

    #[test]
    fn test_playlists() {
        let scheduler = scheduler();
        let response = scheduler.query_at(at(12, 0), "GetPlayLists", "", "", "r1");

        assert!(response.success);
        let playlist = &response.data["playlists"][0];
        assert_eq!(playlist["name"], "Carols");
        assert_eq!(playlist["length"], "0:03.500");
        assert_eq!(playlist["nextscheduled"], "2024-12-20 18:00");
        assert_eq!(response.data["reference"], "r1");
    }

    #[test]
    fn test_playlist_steps() {
        let scheduler = scheduler();
        let response = scheduler.query_at(at(12, 0), "getplayliststeps", "carols", "", "r2");
        assert_eq!(response.data["steps"][0]["startonly"], "true");
        assert_eq!(response.data["steps"][1]["endonly"], "false");
        assert_eq!(response.data["steps"][1]["length"], "0:02.500");

        let response = scheduler.query_at(at(12, 0), "GetPlayListSteps", "Hymns", "", "r3");
        assert!(!response.success);
        assert_eq!(response.message, "Playlist 'Hymns' not found.");
        assert_eq!(response.data["steps"], json!([]));
    }

    #[test]
    fn test_playing_status() {
        let mut scheduler = scheduler();
        let idle = scheduler.query_at(at(12, 0), "GetPlayingStatus", "", "10.0.0.9", "r4");
        assert_eq!(idle.data["status"], "idle");
        assert_eq!(idle.data["ip"], "10.0.0.9");
        assert_eq!(idle.data["time"], "2024-12-20 12:00:00");

        let id = scheduler.playlist("Carols").unwrap().id;
        scheduler.play_playlist(id, PlayOptions::default()).unwrap();
        let status = scheduler.query_at(at(12, 0), "GetPlayingStatus", "", "", "r5");
        assert_eq!(status.data["status"], "playing");
        assert_eq!(status.data["step"], "Intro");
        assert_eq!(status.data["nextstep"], "Jingle");
        assert_eq!(status.data["trigger"], "manual");
        assert_eq!(status.data["schedulename"], "N/A");
        assert_eq!(status.data["left"], "0:01.000");
        assert_eq!(status.data["queuelength"], "0");
    }

    #[test]
    fn test_next_scheduled() {
        let scheduler = scheduler();
        let next = scheduler.query_at(at(12, 0), "GetNextScheduledPlayList", "", "", "r6");
        assert_eq!(next.data["playlistname"], "Carols");
        assert_eq!(next.data["start"], "2024-12-20 18:00");
        assert_eq!(next.data["end"], "22:00");

        let empty = Scheduler::new(Box::new(MemorySink::new(4)));
        let next = empty.query_at(at(12, 0), "GetNextScheduledPlayList", "", "", "r7");
        assert_eq!(next.data["start"], "Never");
    }

    #[test]
    fn test_schedules_and_buttons() {
        let mut scheduler = scheduler();
        let response = scheduler.query_at(at(12, 0), "GetPlayListSchedule", "Carols,evenings", "", "r8");
        assert!(response.success);
        assert_eq!(response.data["name"], "Evenings");
        assert_eq!(response.data["reference"], "r8");

        let response = scheduler.query_at(at(12, 0), "GetPlayListSchedule", "Carols,Mornings", "", "r9");
        assert_eq!(
            response.message,
            "Playlist 'Carols' does not have a schedule 'Mornings'."
        );

        let response = scheduler.query_at(at(12, 0), "GetPlayListSchedules", "Carols", "", "r10");
        assert_eq!(response.data["schedules"].as_array().unwrap().len(), 1);

        scheduler
            .options_mut()
            .add_button(UserButton::new("Quiet", "Set volume to", "10"));
        let response = scheduler.query_at(at(12, 0), "GetButtons", "", "", "r11");
        assert_eq!(response.data["buttons"][0]["label"], "Quiet");
    }

    #[test]
    fn test_unknown_query() {
        let scheduler = scheduler();
        let response = scheduler.query_at(at(12, 0), "GetWeather", "", "", "r12");
        assert!(!response.success);
        assert_eq!(response.message, "Unknown query.");
        assert_eq!(response.data["reference"], "r12");
    }
}
