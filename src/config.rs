//! The cluster configuration file: one map per party, each carrying a list
//! of workers with their network endpoints and paging parameters. Parsed
//! from YAML; every validation failure names the full path of the offending
//! key.

use std::{
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};

use crate::{
    addr::WorkerId,
    deps::serde_yaml,
    error::Error,
};


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Garbler,
    Evaluator,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Garbler => "garbler",
            Role::Evaluator => "evaluator",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "garbler" => Ok(Role::Garbler),
            "evaluator" => Ok(Role::Evaluator),
            bad_value => {
                Err(Error::Parse {
                    value:    bad_value.to_string(),
                    typename: std::any::type_name::<Role>(),
                    reason:   "value was not one of: garbler, evaluator".to_string(),
                })
            }
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}


#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ObliviousTransferConfig {
    pub max_batch_size: u64,
    pub pipeline_depth: u64,
    pub num_daemons:    u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorkerConfig {
    pub internal_host: String,
    pub internal_port: u16,
    #[serde(default)]
    pub external_host: Option<String>,
    #[serde(default)]
    pub external_port: Option<u16>,

    pub storage_path:         PathBuf,
    pub page_shift:           u8,
    pub num_pages:            u64,
    pub prefetch_buffer_size: u64,
    pub prefetch_lookahead:   u64,

    #[serde(default)]
    pub oblivious_transfer: Option<ObliviousTransferConfig>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PartyConfig {
    pub workers: Vec<WorkerConfig>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub garbler:   Option<PartyConfig>,
    #[serde(default)]
    pub evaluator: Option<PartyConfig>,
}

fn config_error<S: Into<String>>(
    path: S,
    reason: S,
) -> Error {
    Error::Config {
        path:   path.into(),
        reason: reason.into(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&text).map_err(|err| {
            Error::Config {
                path:   path.display().to_string(),
                reason: err.to_string(),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn party(
        &self,
        role: Role,
    ) -> Result<&PartyConfig, Error> {
        let party = match role {
            Role::Garbler => self.garbler.as_ref(),
            Role::Evaluator => self.evaluator.as_ref(),
        };
        party.ok_or_else(|| {
            config_error(role.name().to_string(), "party is not present in the configuration".to_string())
        })
    }

    pub fn worker(
        &self,
        role: Role,
        index: WorkerId,
    ) -> Result<&WorkerConfig, Error> {
        let party = self.party(role)?;
        party.workers.get(index as usize).ok_or_else(|| {
            config_error(
                format!("{}.workers[{}]", role.name(), index),
                format!("party has only {} workers", party.workers.len()),
            )
        })
    }

    fn validate(&self) -> Result<(), Error> {
        for role in [Role::Garbler, Role::Evaluator].iter() {
            let party = match self.party(*role) {
                Ok(party) => party,
                Err(_) => continue,
            };
            if party.workers.is_empty() {
                return Err(config_error(
                    format!("{}.workers", role.name()),
                    "at least one worker is required".to_string(),
                ));
            }
            for (index, worker) in party.workers.iter().enumerate() {
                let at = |field: &str| format!("{}.workers[{}].{}", role.name(), index, field);

                if worker.internal_host.is_empty() {
                    return Err(config_error(at("internal_host"), "must not be empty".to_string()));
                }
                if worker.internal_port == 0 {
                    return Err(config_error(at("internal_port"), "must be nonzero".to_string()));
                }
                // external_host and external_port only make sense together.
                match (&worker.external_host, &worker.external_port) {
                    (Some(_), None) => {
                        return Err(config_error(
                            at("external_port"),
                            "required when external_host is given".to_string(),
                        ));
                    }
                    (None, Some(_)) => {
                        return Err(config_error(
                            at("external_host"),
                            "required when external_port is given".to_string(),
                        ));
                    }
                    _ => {}
                }
                if worker.page_shift == 0 || worker.page_shift > 40 {
                    return Err(config_error(
                        at("page_shift"),
                        "must be between 1 and 40".to_string(),
                    ));
                }
                if worker.num_pages == 0 {
                    return Err(config_error(at("num_pages"), "must be nonzero".to_string()));
                }
                if worker.prefetch_lookahead == 0 && worker.prefetch_buffer_size != 0 {
                    return Err(config_error(
                        at("prefetch_lookahead"),
                        "required when a prefetch buffer is configured".to_string(),
                    ));
                }
                if let Some(ot) = &worker.oblivious_transfer {
                    if ot.num_daemons == 0 {
                        return Err(config_error(
                            at("oblivious_transfer.num_daemons"),
                            "must be nonzero".to_string(),
                        ));
                    }
                    if ot.max_batch_size == 0 {
                        return Err(config_error(
                            at("oblivious_transfer.max_batch_size"),
                            "must be nonzero".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
