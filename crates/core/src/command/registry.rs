use std::collections::HashMap;
use std::str::FromStr;

use marquee_show::BlendMode;

use super::command::{Command, CommandError, StopWhen};

/// Comma separated parameters for one command invocation.
pub struct Params<'a> {
    command: &'a str,
    raw: &'a str,
    parts: Vec<&'a str>,
}

impl<'a> Params<'a> {
    pub fn new(command: &'a str, raw: &'a str) -> Self {
        let parts = if raw.is_empty() {
            Vec::new()
        } else {
            raw.split(',').collect()
        };
        Self {
            command,
            raw,
            parts,
        }
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    fn require(&self, expected: usize) -> Result<(), CommandError> {
        if self.parts.len() < expected || self.parts[..expected].iter().any(|p| p.is_empty()) {
            return Err(CommandError::MissingParameters {
                command: self.command.to_string(),
                expected,
                parameters: self.raw.to_string(),
            });
        }
        Ok(())
    }

    pub fn text(&self, index: usize) -> Result<String, CommandError> {
        self.require(index + 1)?;
        Ok(self.parts[index].to_string())
    }

    pub fn number<T: FromStr>(&self, index: usize) -> Result<T, CommandError> {
        self.require(index + 1)?;
        let part = self.parts[index].trim();
        part.parse()
            .map_err(|_| CommandError::InvalidNumber(part.to_string()))
    }

    pub fn optional(&self, index: usize) -> Option<&'a str> {
        self.parts.get(index).copied().filter(|p| !p.trim().is_empty())
    }

    /// Everything after the first `skip` parameters, re-joined.
    pub fn rest(&self, skip: usize) -> String {
        self.parts.iter().skip(skip).copied().collect::<Vec<_>>().join(",")
    }
}

pub type CommandParser = fn(&Params) -> Result<Command, CommandError>;

pub struct CommandDefinition {
    pub name: &'static str,
    /// Human readable parameter list, empty when the command takes none.
    pub parameters: &'static str,
    parse: CommandParser,
}

/// Table of named commands. Lookup is case-insensitive.
pub struct CommandRegistry {
    definitions: Vec<CommandDefinition>,
    index: HashMap<String, usize>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn empty() -> Self {
        Self {
            definitions: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// A registry holding every built-in command.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry
    }

    pub fn register(&mut self, name: &'static str, parameters: &'static str, parse: CommandParser) {
        let key = name.to_lowercase();
        if let Some(existing) = self.index.get(&key) {
            log::warn!("Command '{}' registered twice, replacing", name);
            self.definitions[*existing] = CommandDefinition {
                name,
                parameters,
                parse,
            };
            return;
        }
        self.index.insert(key, self.definitions.len());
        self.definitions.push(CommandDefinition {
            name,
            parameters,
            parse,
        });
    }

    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.index
            .get(&name.to_lowercase())
            .map(|i| &self.definitions[*i])
    }

    pub fn definitions(&self) -> &[CommandDefinition] {
        &self.definitions
    }

    pub fn parse(&self, name: &str, parameters: &str) -> Result<Command, CommandError> {
        let definition = self
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        (definition.parse)(&Params::new(definition.name, parameters))
    }

    fn register_builtins(&mut self) {
        self.register("Stop all now", "", |_| Ok(Command::StopAll));
        self.register("Stop", "", |_| Ok(Command::Stop));

        self.register("Play selected playlist", "", |_| {
            Ok(Command::PlaySelected { looped: false })
        });
        self.register("Play selected playlist looped", "", |_| {
            Ok(Command::PlaySelected { looped: true })
        });
        self.register("Play specified playlist", "playlist", |p| {
            Ok(Command::PlayPlaylist {
                playlist: p.text(0)?,
                looped: false,
            })
        });
        self.register("Play specified playlist looped", "playlist", |p| {
            Ok(Command::PlayPlaylist {
                playlist: p.text(0)?,
                looped: true,
            })
        });
        self.register("Play specified playlist n times", "playlist,n", |p| {
            Ok(Command::PlayPlaylistTimes {
                playlist: p.text(0)?,
                loops: p.number(1)?,
            })
        });
        self.register("Play playlist starting at step", "playlist,step", |p| {
            Ok(Command::PlayFromStep {
                playlist: p.text(0)?,
                step: p.text(1)?,
                looped: false,
            })
        });
        self.register("Play playlist starting at step looped", "playlist,step", |p| {
            Ok(Command::PlayFromStep {
                playlist: p.text(0)?,
                step: p.text(1)?,
                looped: true,
            })
        });
        self.register("Play playlist step", "playlist,step", parse_step_once);
        self.register(
            "Play specified playlist step once only",
            "playlist,step",
            parse_step_once,
        );
        self.register("Play specified playlist step n times", "playlist,step,n", |p| {
            Ok(Command::PlayStepTimes {
                playlist: p.text(0)?,
                step: p.text(1)?,
                loops: p.number(2)?,
            })
        });
        self.register(
            "Play specified step in specified playlist looped",
            "playlist,step",
            |p| {
                Ok(Command::PlayStepLooped {
                    playlist: p.text(0)?,
                    step: p.text(1)?,
                })
            },
        );

        self.register("Stop specified playlist", "playlist", |p| {
            Ok(Command::StopPlaylist {
                playlist: p.text(0)?,
                when: StopWhen::Now,
            })
        });
        self.register(
            "Stop specified playlist at end of current step",
            "playlist",
            |p| {
                Ok(Command::StopPlaylist {
                    playlist: p.text(0)?,
                    when: StopWhen::EndOfStep,
                })
            },
        );
        self.register(
            "Stop specified playlist at end of current loop",
            "playlist",
            |p| {
                Ok(Command::StopPlaylist {
                    playlist: p.text(0)?,
                    when: StopWhen::EndOfLoop,
                })
            },
        );
        self.register("Stop playlist at end of current step", "", |_| {
            Ok(Command::StopCurrent(StopWhen::EndOfStep))
        });
        self.register("Stop playlist at end of current loop", "", |_| {
            Ok(Command::StopCurrent(StopWhen::EndOfLoop))
        });
        self.register(
            "Jump to play once at end at end of current step and then stop",
            "",
            |_| Ok(Command::JumpToEndSteps),
        );

        self.register("Pause", "", |_| Ok(Command::Pause));
        self.register("Next step in current playlist", "", |_| Ok(Command::NextStep));
        self.register("Prior step in current playlist", "", |_| Ok(Command::PriorStep));
        self.register("Restart step in current playlist", "", |_| {
            Ok(Command::RestartStep)
        });
        self.register("Jump to specified step in current playlist", "step", |p| {
            Ok(Command::JumpToStep {
                step: p.raw().to_string(),
                at_end_of_step: false,
            })
        });
        self.register(
            "Jump to specified step in current playlist at the end of current step",
            "step",
            |p| {
                Ok(Command::JumpToStep {
                    step: p.raw().to_string(),
                    at_end_of_step: true,
                })
            },
        );
        self.register("Jump to random step in current playlist", "", |_| {
            Ok(Command::JumpToRandomStep { playlist: None })
        });
        self.register("Jump to random step in specified playlist", "playlist", |p| {
            Ok(Command::JumpToRandomStep {
                playlist: Some(p.text(0)?),
            })
        });
        self.register("Toggle loop current step", "", |_| Ok(Command::ToggleStepLoop));
        self.register("Toggle current playlist random", "", |_| {
            Ok(Command::ToggleRandom)
        });
        self.register("Toggle current playlist loop", "", |_| Ok(Command::ToggleLoop));

        self.register("Enqueue playlist step", "playlist,step", |p| {
            Ok(Command::EnqueueStep {
                playlist: p.text(0)?,
                step: p.text(1)?,
            })
        });
        self.register("Clear playlist queue", "", |_| Ok(Command::ClearQueue));

        self.register("Add to the current schedule n minutes", "n", |p| {
            Ok(Command::AddMinutesToSchedule(p.number(0)?))
        });
        self.register("Restart selected schedule", "", |_| {
            Ok(Command::RestartSchedule { schedule: None })
        });
        self.register("Restart named schedule", "schedule", |p| {
            Ok(Command::RestartSchedule {
                schedule: Some(p.text(0)?),
            })
        });

        self.register("Set volume to", "volume", |p| {
            Ok(Command::SetVolume(p.number(0)?))
        });
        self.register("Adjust volume by", "delta", |p| {
            Ok(Command::AdjustVolume(p.number(0)?))
        });
        self.register("Toggle mute", "", |_| Ok(Command::ToggleMute));
        self.register("Set brightness to n%", "n", |p| {
            Ok(Command::SetBrightness(p.number(0)?))
        });
        self.register("Increase brightness by n%", "n", |p| {
            Ok(Command::AdjustBrightness(p.number(0)?))
        });
        self.register("Toggle output to lights", "", |_| {
            Ok(Command::ToggleOutputToLights)
        });

        self.register("Set pixels", "startchannel[,blendmode]", |p| {
            let start_channel: usize = p.number(0)?;
            if start_channel == 0 {
                return Err(CommandError::InvalidOverlay(
                    "start channel must be 1 or more".to_string(),
                ));
            }
            let blend = match p.optional(1) {
                Some(token) => token
                    .parse::<BlendMode>()
                    .map_err(|e| CommandError::InvalidOverlay(e.to_string()))?,
                None => BlendMode::Overwrite,
            };
            Ok(Command::SetPixels {
                start_channel,
                blend,
            })
        });

        self.register("Refresh current playlist", "", |_| {
            Ok(Command::RefreshCurrentPlaylist)
        });
        self.register("Save schedule", "", |_| Ok(Command::SaveSchedule));
        self.register(
            "Run command at end of current step",
            "command[,parameters...]",
            |p| {
                Ok(Command::RunCommandAtEndOfStep {
                    command: p.text(0)?,
                    parameters: p.rest(1),
                })
            },
        );
        self.register("PressButton", "button", |p| {
            Ok(Command::PressButton(p.raw().to_string()))
        });
    }
}

fn parse_step_once(p: &Params) -> Result<Command, CommandError> {
    Ok(Command::PlayStepOnce {
        playlist: p.text(0)?,
        step: p.text(1)?,
    })
}
