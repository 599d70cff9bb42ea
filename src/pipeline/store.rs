use geojson::FeatureCollection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::Paths;
use crate::model::canonical::{CanonicalSnapshot, GeneratedArtifacts, FIRST_LAST, ROUTES, SERVICES, STOPS};
use crate::model::patch::{
    CityMapperRouteInfo, DegenerateGeometry, GeometryPatch, NameCorrection, OneMapDirections, PatchSet,
    PatchSource, RepairRecord,
};
use crate::model::raw::{file_stem, FailureRecord, RawDirection, RawSnapshot};

use super::error::Error;

pub const BUS_STOPS: &str = "bus-stops.json";
pub const BUS_SERVICES: &str = "bus-services.json";
pub const DATAMALL_STOPS: &str = "bus-stops.datamall.json";
pub const DATAMALL_ROUTES: &str = "bus-routes.datamall.json";
pub const FAILURES: &str = "bus-services-routes.failures.json";
pub const MISSING_SERVICES: &str = "missing-services.json";
pub const DEGENERATE: &str = "patch-multiple-routes.results.json";
pub const STOP_NAMES: &str = "bus-stop-names.json";
pub const REPAIRS: &str = "repairs.json";

/// JSON snapshot files of every stage, resolved against a data directory.
///
/// Files whose name contains `.min.` are written compact, everything else
/// tab-indented.
pub struct DataStore {
    root: PathBuf,
    paths: Paths,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>, paths: &Paths) -> DataStore {
        DataStore {
            root: root.into(),
            paths: paths.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_file(&self, name: &str) -> PathBuf {
        self.root.join(&self.paths.raw).join(name)
    }

    pub fn patch_file(&self, name: &str) -> PathBuf {
        self.root.join(&self.paths.patch).join(name)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.paths.output)
    }

    /// Output path relative to the data directory, as stored in git.
    pub fn output_relative(&self, name: &str) -> PathBuf {
        self.paths.output.join(name)
    }

    pub fn service_file(&self, service_type: &str, name: &str) -> PathBuf {
        self.root.join(&self.paths.services).join(service_type).join(name)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    pub fn read<T>(&self, path: &Path) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        log::debug!("Reading {}", path.display());
        let file = fs::File::open(path).map_err(|e| Error::named(path.display(), e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::named(path.display(), e))
    }

    /// Reads a file that a previous stage may not have written.
    pub fn read_optional<T>(&self, path: &Path) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        if self.exists(path) {
            self.read(path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn write<T>(&self, path: &Path, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::named(parent.display(), e))?;
        }
        let file = fs::File::create(path).map_err(|e| Error::named(path.display(), e))?;
        let mut writer = BufWriter::new(file);
        let minified = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(".min."));
        if minified {
            serde_json::to_writer(&mut writer, value)?;
        } else {
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
            let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
            value.serialize(&mut serializer)?;
        }
        writer.flush().map_err(|e| Error::named(path.display(), e))?;
        log::debug!("Written {}", path.display());
        Ok(())
    }

    /// Writes `<stem>.<extension>` and its compact `<stem>.min.<extension>` twin.
    pub fn write_pair<T>(&self, dir: &Path, stem: &str, extension: &str, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        self.write(&dir.join(format!("{stem}.{extension}")), value)?;
        self.write(&dir.join(format!("{stem}.min.{extension}")), value)
    }

    pub fn load_failures(&self) -> Result<FailureRecord, Error> {
        Ok(self.read_optional(&self.patch_file(FAILURES))?.unwrap_or_default())
    }

    /// Reads back everything the fetch stage wrote. Route and geometry files that
    /// are absent were recorded as failures and are left out.
    pub fn load_raw_snapshot(&self) -> Result<RawSnapshot, Error> {
        let mut snapshot = RawSnapshot {
            stops: self.read(&self.raw_file(BUS_STOPS))?,
            services: self.read(&self.raw_file(BUS_SERVICES))?,
            datamall_stops: self.read_optional(&self.raw_file(DATAMALL_STOPS))?.unwrap_or_default(),
            datamall_routes: self.read_optional(&self.raw_file(DATAMALL_ROUTES))?.unwrap_or_default(),
            failures: self.load_failures()?,
            ..RawSnapshot::default()
        };
        let mut routes = BTreeMap::new();
        let mut geometries = BTreeMap::new();
        for service in &snapshot.services {
            for file in &service.route_files {
                let stem = file_stem(file);
                let path = self.service_file(&service.service_type, &format!("{stem}.json"));
                if let Some(directions) = self.read_optional::<Vec<RawDirection>>(&path)? {
                    routes.insert(stem.to_string(), directions);
                }
            }
            for file in &service.kml_files {
                let stem = file_stem(file);
                let path = self.service_file(&service.service_type, &format!("{stem}.geojson"));
                if let Some(collection) = self.read_optional::<FeatureCollection>(&path)? {
                    geometries.insert(stem.to_string(), collection);
                }
            }
        }
        snapshot.routes = routes;
        snapshot.geometries = geometries;
        Ok(snapshot)
    }

    pub fn write_geometry_patch(&self, number: &str, patch: &GeometryPatch) -> Result<(), Error> {
        let path = self.patch_file(&format!("{}.{}.json", number, patch.source().file_suffix()));
        match patch {
            GeometryPatch::OneMap(directions) => self.write(&path, directions),
            // Going through `Value` sorts every object's keys.
            GeometryPatch::CityMapper(info) => self.write(&path, &serde_json::to_value(info)?),
        }
    }

    /// Removes the geometry patch files of an earlier patch run.
    fn clear_geometry_patches(&self) -> Result<(), Error> {
        let dir = self.root.join(&self.paths.patch);
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(&dir).map_err(|e| Error::named(dir.display(), e))? {
            let path = entry?.path();
            let is_patch = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".om.json") || n.ends_with(".cm.json"));
            if is_patch {
                fs::remove_file(&path).map_err(|e| Error::named(path.display(), e))?;
            }
        }
        Ok(())
    }

    /// Writes every patch stage output, replacing the geometry patches of any
    /// earlier run.
    pub fn write_patch_set(&self, patches: &PatchSet) -> Result<(), Error> {
        self.clear_geometry_patches()?;
        for (number, patch) in &patches.geometries {
            self.write_geometry_patch(number, patch)?;
        }
        self.write(&self.patch_file(MISSING_SERVICES), &patches.missing_services)?;
        self.write(&self.patch_file(DEGENERATE), &patches.degenerate)?;
        self.write(&self.patch_file(STOP_NAMES), &patches.name_corrections)?;
        self.write(&self.patch_file(REPAIRS), &patches.repairs)?;
        Ok(())
    }

    /// Reads back the patch stage outputs. A service with patch files from both
    /// repair providers uses the secondary provider's.
    pub fn load_patch_set(&self) -> Result<PatchSet, Error> {
        let mut patches = PatchSet {
            missing_services: self.read_optional(&self.patch_file(MISSING_SERVICES))?.unwrap_or_default(),
            degenerate: self
                .read_optional::<Vec<DegenerateGeometry>>(&self.patch_file(DEGENERATE))?
                .unwrap_or_default(),
            name_corrections: self
                .read_optional::<Vec<NameCorrection>>(&self.patch_file(STOP_NAMES))?
                .unwrap_or_default(),
            repairs: self
                .read_optional::<Vec<RepairRecord>>(&self.patch_file(REPAIRS))?
                .unwrap_or_default(),
            ..PatchSet::default()
        };

        let dir = self.root.join(&self.paths.patch);
        if !dir.is_dir() {
            return Ok(patches);
        }
        let mut found: BTreeMap<String, PatchSource> = BTreeMap::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::named(dir.display(), e))? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(number) = name.strip_suffix(".om.json") {
                found.insert(number.to_string(), PatchSource::OneMap);
            } else if let Some(number) = name.strip_suffix(".cm.json") {
                found.entry(number.to_string()).or_insert(PatchSource::CityMapper);
            }
        }
        for (number, source) in found {
            let path = self.patch_file(&format!("{}.{}.json", number, source.file_suffix()));
            let patch = match source {
                PatchSource::OneMap => GeometryPatch::OneMap(self.read::<OneMapDirections>(&path)?),
                PatchSource::CityMapper => GeometryPatch::CityMapper(self.read::<CityMapperRouteInfo>(&path)?),
            };
            patches.geometries.insert(number, patch);
        }
        Ok(patches)
    }

    pub fn write_artifacts(&self, artifacts: &GeneratedArtifacts) -> Result<(), Error> {
        let dir = self.output_dir();
        self.write_pair(&dir, STOPS, "geojson", &artifacts.stops_geojson)?;
        self.write_pair(&dir, ROUTES, "geojson", &artifacts.routes_geojson)?;
        let snapshot = &artifacts.snapshot;
        self.write_pair(&dir, STOPS, "json", &snapshot.stops)?;
        self.write_pair(&dir, SERVICES, "json", &snapshot.services)?;
        self.write_pair(&dir, ROUTES, "json", &snapshot.routes)?;
        self.write_pair(&dir, FIRST_LAST, "json", &snapshot.first_last)?;
        log::info!("Wrote canonical files to {}", dir.display());
        Ok(())
    }

    /// Reads the four canonical documents from a directory.
    pub fn load_canonical(&self, dir: &Path) -> Result<CanonicalSnapshot, Error> {
        Ok(CanonicalSnapshot {
            stops: self.read(&dir.join(format!("{STOPS}.json")))?,
            services: self.read(&dir.join(format!("{SERVICES}.json")))?,
            routes: self.read(&dir.join(format!("{ROUTES}.json")))?,
            first_last: self.read(&dir.join(format!("{FIRST_LAST}.json")))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::geometry::features::convert_to_geojson;
    use crate::model::raw::{RawCoordinates, RawService, RawStop};

    fn store(dir: &tempfile::TempDir) -> DataStore {
        DataStore::new(dir.path(), &Config::default().paths)
    }

    #[test]
    fn canonical_files_are_tab_indented_and_min_files_compact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let value = serde_json::json!({"a": [1, 2]});
        store.write_pair(dir.path(), "doc", "json", &value).unwrap();

        let pretty = fs::read_to_string(dir.path().join("doc.json")).unwrap();
        assert!(pretty.contains("\n\t\"a\""));
        let min = fs::read_to_string(dir.path().join("doc.min.json")).unwrap();
        assert_eq!(min, r#"{"a":[1,2]}"#);
    }

    #[test]
    fn missing_optional_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let value: Option<Vec<String>> = store.read_optional(&store.patch_file(MISSING_SERVICES)).unwrap();
        assert!(value.is_none());
        assert!(matches!(
            store.read::<Vec<String>>(&store.patch_file(MISSING_SERVICES)),
            Err(Error::NamedFileIO { .. })
        ));
    }

    #[test]
    fn raw_snapshot_skips_absent_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let stops = vec![RawStop {
            name: "01012".into(),
            details: "Hotel Grand Pacific".into(),
            coordinates: RawCoordinates { long: 103.8, lat: 1.3 },
            extra: BTreeMap::new(),
        }];
        let services = vec![RawService {
            number: "10".into(),
            service_type: "TRUNK".into(),
            kml_files: vec!["10-1.kml".into(), "10-2.kml".into()],
            route_files: vec!["10.xml".into()],
            extra: BTreeMap::new(),
        }];
        store.write(&store.raw_file(BUS_STOPS), &stops).unwrap();
        store.write(&store.raw_file(BUS_SERVICES), &services).unwrap();
        let directions = vec![RawDirection { name: "1".into(), stops: vec!["01012".into()] }];
        store.write(&store.service_file("TRUNK", "10.json"), &directions).unwrap();
        store
            .write(&store.service_file("TRUNK", "10-1.geojson"), &convert_to_geojson(vec![]))
            .unwrap();

        let snapshot = store.load_raw_snapshot().unwrap();
        assert_eq!(snapshot.stops, stops);
        assert_eq!(snapshot.routes["10"], directions);
        assert!(snapshot.geometries.contains_key("10-1"));
        assert!(!snapshot.geometries.contains_key("10-2"));
        assert!(snapshot.failures.is_empty());
    }

    #[test]
    fn secondary_patch_wins_over_tertiary() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let onemap = GeometryPatch::OneMap(OneMapDirections { direction_one: None, direction_two: None });
        let info: CityMapperRouteInfo = serde_json::from_str(r#"{"routes": []}"#).unwrap();
        store.write_geometry_patch("10", &onemap).unwrap();
        store.write_geometry_patch("10", &GeometryPatch::CityMapper(info.clone())).unwrap();
        store.write_geometry_patch("21", &GeometryPatch::CityMapper(info)).unwrap();

        let patches = store.load_patch_set().unwrap();
        assert_eq!(patches.geometries["10"].source(), PatchSource::OneMap);
        assert_eq!(patches.geometries["21"].source(), PatchSource::CityMapper);
    }

    #[test]
    fn patch_run_replaces_earlier_geometry_patches() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let onemap = GeometryPatch::OneMap(OneMapDirections { direction_one: None, direction_two: None });
        let info: CityMapperRouteInfo = serde_json::from_str(r#"{"routes": []}"#).unwrap();
        store.write_geometry_patch("10", &onemap).unwrap();
        store.write_geometry_patch("99", &GeometryPatch::CityMapper(info.clone())).unwrap();
        fs::write(store.patch_file("notes.json"), "[]").unwrap();

        let mut patches = PatchSet::default();
        patches.geometries.insert("10".into(), GeometryPatch::CityMapper(info));
        store.write_patch_set(&patches).unwrap();

        let loaded = store.load_patch_set().unwrap();
        assert_eq!(loaded.geometries.len(), 1);
        assert_eq!(loaded.geometries["10"].source(), PatchSource::CityMapper);
        assert!(!store.patch_file("10.om.json").exists());
        assert!(store.patch_file("notes.json").exists());
    }
}
