use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    pub schedule_enabled: bool,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub is_idle: bool,
}

impl Workload {
    pub fn new(name: impl Into<String>, schedule_enabled: bool) -> Self {
        Self {
            name: name.into(),
            schedule_enabled,
            is_running: false,
            is_idle: false,
        }
    }

    /// Continuous job types report running while idle, so `is_idle` decides.
    pub fn is_active(&self) -> bool {
        self.is_running && !self.is_idle
    }
}

pub fn has_active_work(workloads: &[Workload]) -> bool {
    workloads.iter().any(Workload::is_active)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadSnapshot {
    names: Vec<String>,
}

impl WorkloadSnapshot {
    /// Keeps schedule-enabled workloads only, in discovery order, without duplicates.
    pub fn capture(workloads: &[Workload]) -> Self {
        let mut names: Vec<String> = Vec::new();
        for workload in workloads.iter().filter(|workload| workload.schedule_enabled) {
            if !names.contains(&workload.name) {
                names.push(workload.name.clone());
            }
        }
        Self { names }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collected: Vec<String> = Vec::new();
        for name in names.into_iter().map(Into::into) {
            if !name.trim().is_empty() && !collected.contains(&name) {
                collected.push(name);
            }
        }
        Self { names: collected }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|candidate| candidate == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}
