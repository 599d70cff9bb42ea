use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::process::Command;

use crate::model::canonical::{CanonicalSnapshot, FIRST_LAST, ROUTES, SERVICES, STOPS};

use super::error::Error;
use super::store::DataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountChange {
    pub old: usize,
    pub new: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub number: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rename {
    pub number: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relocation {
    pub number: String,
    pub old_coordinates: [f64; 2],
    pub new_coordinates: [f64; 2],
}

/// Stops served by a service that were added to or removed from its routes.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteChange {
    pub number: String,
    pub name: String,
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopChanges {
    pub count: CountChange,
    pub added: Vec<Entry>,
    pub removed: Vec<Entry>,
    pub renamed: Vec<Rename>,
    pub relocated: Vec<Relocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceChanges {
    pub count: CountChange,
    pub added: Vec<Entry>,
    pub removed: Vec<Entry>,
    pub route_changes: Vec<RouteChange>,
}

/// Differences between two canonical revisions.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub date: String,
    pub stops: StopChanges,
    pub services: ServiceChanges,
    /// Services whose encoded geometry changed.
    pub routes: Vec<Entry>,
    /// Services whose first/last timings changed.
    pub first_last: Vec<String>,
}

fn stop_changes(old: &CanonicalSnapshot, new: &CanonicalSnapshot) -> StopChanges {
    let mut changes = StopChanges {
        count: CountChange {
            old: old.stops.len(),
            new: new.stops.len(),
        },
        added: vec![],
        removed: vec![],
        renamed: vec![],
        relocated: vec![],
    };
    for (number, stop) in &new.stops {
        match old.stops.get(number) {
            None => changes.added.push(Entry {
                number: number.clone(),
                name: stop.name().to_string(),
            }),
            Some(previous) => {
                if previous.name() != stop.name() {
                    changes.renamed.push(Rename {
                        number: number.clone(),
                        old_name: previous.name().to_string(),
                        new_name: stop.name().to_string(),
                    });
                }
                if previous.lon() != stop.lon() || previous.lat() != stop.lat() {
                    changes.relocated.push(Relocation {
                        number: number.clone(),
                        old_coordinates: [previous.lon(), previous.lat()],
                        new_coordinates: [stop.lon(), stop.lat()],
                    });
                }
            }
        }
    }
    changes.removed = old
        .stops
        .iter()
        .filter(|(number, _)| !new.stops.contains_key(*number))
        .map(|(number, stop)| Entry {
            number: number.clone(),
            name: stop.name().to_string(),
        })
        .collect();
    changes
}

fn service_changes(old: &CanonicalSnapshot, new: &CanonicalSnapshot) -> ServiceChanges {
    let mut changes = ServiceChanges {
        count: CountChange {
            old: old.services.len(),
            new: new.services.len(),
        },
        added: vec![],
        removed: vec![],
        route_changes: vec![],
    };
    for (number, service) in &new.services {
        let Some(previous) = old.services.get(number) else {
            changes.added.push(Entry {
                number: number.clone(),
                name: service.name.clone(),
            });
            continue;
        };
        if previous.routes != service.routes {
            let old_stops: BTreeSet<&String> = previous.routes.iter().flatten().collect();
            let new_stops: BTreeSet<&String> = service.routes.iter().flatten().collect();
            changes.route_changes.push(RouteChange {
                number: number.clone(),
                name: service.name.clone(),
                added: new_stops.difference(&old_stops).count(),
                removed: old_stops.difference(&new_stops).count(),
            });
        }
    }
    changes.removed = old
        .services
        .iter()
        .filter(|(number, _)| !new.services.contains_key(*number))
        .map(|(number, service)| Entry {
            number: number.clone(),
            name: service.name.clone(),
        })
        .collect();
    changes
}

/// Keys whose values differ between two maps, including keys present in only one.
fn changed_keys<'m, V: PartialEq>(old: &'m BTreeMap<String, V>, new: &'m BTreeMap<String, V>) -> Vec<&'m String> {
    old.keys()
        .chain(new.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|key| old.get(*key) != new.get(*key))
        .collect()
}

fn route_changes(old: &CanonicalSnapshot, new: &CanonicalSnapshot) -> Vec<Entry> {
    changed_keys(&old.routes, &new.routes)
        .into_iter()
        .filter_map(|number| {
            let service = new.services.get(number)?;
            Some(Entry {
                number: number.clone(),
                name: service.name.clone(),
            })
        })
        .collect()
}

/// Concatenated timings per service across every stop, so that moving a record
/// from one stop to another is not a change.
fn timings_by_service(first_last: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, String> {
    let mut timings: BTreeMap<String, String> = BTreeMap::new();
    for record in first_last.values().flatten() {
        let mut parts = record.split(' ');
        let Some(service) = parts.next() else {
            continue;
        };
        timings.entry(service.to_string()).or_default().extend(parts);
    }
    timings
}

fn first_last_changes(old: &CanonicalSnapshot, new: &CanonicalSnapshot) -> Vec<String> {
    let old = timings_by_service(&old.first_last);
    let new = timings_by_service(&new.first_last);
    changed_keys(&old, &new).into_iter().cloned().collect()
}

/// Compares two revisions. Identical revisions are an error.
pub fn detect(old: &CanonicalSnapshot, new: &CanonicalSnapshot, date: NaiveDate) -> Result<ChangeSet, Error> {
    let changes = ChangeSet {
        date: date.format("%-d %B %Y").to_string(),
        stops: stop_changes(old, new),
        services: service_changes(old, new),
        routes: route_changes(old, new),
        first_last: first_last_changes(old, new),
    };
    if changes.is_empty() {
        return Err(Error::NoChanges);
    }
    Ok(changes)
}

fn list(f: &mut fmt::Formatter, entries: &[Entry]) -> fmt::Result {
    for entry in entries {
        writeln!(f, "- `{}` {}", entry.number, entry.name)?;
    }
    Ok(())
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.stops.added.is_empty()
            && self.stops.removed.is_empty()
            && self.stops.renamed.is_empty()
            && self.stops.relocated.is_empty()
            && self.services.added.is_empty()
            && self.services.removed.is_empty()
            && self.services.route_changes.is_empty()
            && self.routes.is_empty()
            && self.first_last.is_empty()
    }

    /// The changelog, one section per entity.
    pub fn to_markdown(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "# {}", self.date)?;

        let stops = &self.stops;
        if stops.count.old != stops.count.new {
            writeln!(f, "\n## Stops count change: {} ⮕ {}", stops.count.old, stops.count.new)?;
        }
        if !stops.added.is_empty() {
            writeln!(f, "\n### Stops added: {}\n", stops.added.len())?;
            list(f, &stops.added)?;
        }
        if !stops.removed.is_empty() {
            writeln!(f, "\n### Stops removed: {}\n", stops.removed.len())?;
            list(f, &stops.removed)?;
        }
        if !stops.renamed.is_empty() {
            writeln!(f, "\n### Stop names changed: {}\n", stops.renamed.len())?;
            for stop in &stops.renamed {
                writeln!(f, "- `{}` {} ⮕ {}", stop.number, stop.old_name, stop.new_name)?;
            }
        }
        if !stops.relocated.is_empty() {
            writeln!(f, "\n### Stop locations changed: {}\n", stops.relocated.len())?;
            for stop in &stops.relocated {
                let [old_lon, old_lat] = stop.old_coordinates;
                let [new_lon, new_lat] = stop.new_coordinates;
                writeln!(f, "- `{}` {},{} ⮕ {},{}", stop.number, old_lon, old_lat, new_lon, new_lat)?;
            }
        }

        let services = &self.services;
        if services.count.old != services.count.new {
            writeln!(
                f,
                "\n## Services count change: {} ⮕ {}",
                services.count.old, services.count.new
            )?;
        }
        if !services.added.is_empty() {
            writeln!(f, "\n### Services added: {}\n", services.added.len())?;
            list(f, &services.added)?;
        }
        if !services.removed.is_empty() {
            writeln!(f, "\n### Services removed: {}\n", services.removed.len())?;
            list(f, &services.removed)?;
        }
        if !services.route_changes.is_empty() {
            writeln!(f, "\n### Bus Stop Changes To Routes: {}\n", services.route_changes.len())?;
            for change in &services.route_changes {
                let counts: Vec<String> = [(change.added, '+'), (change.removed, '-')]
                    .into_iter()
                    .filter(|(count, _)| *count > 0)
                    .map(|(count, sign)| format!("{sign}{count}"))
                    .collect();
                writeln!(f, "- `{}` {}: {}", change.number, change.name, counts.join(", "))?;
            }
        }

        if !self.routes.is_empty() {
            writeln!(f, "\n## Routes changed: {}\n", self.routes.len())?;
            list(f, &self.routes)?;
        }

        if !self.first_last.is_empty() {
            let affected: Vec<String> = self.first_last.iter().map(|s| format!("`{s}`")).collect();
            writeln!(f, "\n## First/last timings changed\n")?;
            writeln!(f, "Affected services: {}", affected.join(", "))?;
        }
        Ok(())
    }
}

/// Reads a previous revision's canonical file from git, relative to the data
/// directory.
fn git_show(store: &DataStore, git_ref: &str, name: &str) -> Result<Vec<u8>, Error> {
    let path = store.output_relative(name);
    let spec = format!("{}:./{}", git_ref, path.display());
    log::debug!("git show {}", spec);
    let output = Command::new("git")
        .arg("show")
        .arg(&spec)
        .current_dir(store.root())
        .output()
        .map_err(|e| Error::Git(format!("cannot run git: {e}")))?;
    if !output.status.success() {
        return Err(Error::Git(format!(
            "git show {} failed: {}",
            spec,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

pub fn load_from_git(store: &DataStore, git_ref: &str) -> Result<CanonicalSnapshot, Error> {
    let read = |stem: &str| -> Result<Vec<u8>, Error> { git_show(store, git_ref, &format!("{stem}.json")) };
    Ok(CanonicalSnapshot {
        stops: serde_json::from_slice(&read(STOPS)?)?,
        services: serde_json::from_slice(&read(SERVICES)?)?,
        routes: serde_json::from_slice(&read(ROUTES)?)?,
        first_last: serde_json::from_slice(&read(FIRST_LAST)?)?,
    })
}
