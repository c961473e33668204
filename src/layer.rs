//! One layer of an open source.

use crate::config::Portal;
use crate::error::{ManagerError, Result};
use crate::export::{self, ExportFormat};
use crate::schema::{self, SchemaField};
use crate::slug::slugify;
use crate::source::{CopyOptions, Feature, LayerSnapshot, SpatialSource};
use crate::srs::{Projection, SpatialRef};
use crate::types::LayerDefinition;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Longest layer name the portal catalog accepts.
pub const MAX_LAYER_NAME_LEN: usize = 63;

const SUFFIX_LEN: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 64;

/// A layer inside a [`SpatialSource`]; valid while the source stays open.
#[derive(Debug)]
pub struct LayerHandle<'a> {
    source: &'a SpatialSource,
    portal: &'a Portal,
    name: String,
    definition: LayerDefinition,
}

/// What the upload page shows for a layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub expected_name: String,
    pub feature_count: u64,
    pub geometry_type_name: String,
    pub geometry_type: i32,
    pub projection: Option<Projection>,
    pub schema: Vec<SchemaField>,
}

impl<'a> LayerHandle<'a> {
    pub(crate) fn new(source: &'a SpatialSource, portal: &'a Portal, name: &str) -> Result<Self> {
        let definition = source.layer_definition(name)?;
        Ok(Self {
            source,
            portal,
            name: definition.name.clone(),
            definition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &LayerDefinition {
        &self.definition
    }

    pub fn full_schema(&self) -> Vec<SchemaField> {
        schema::full_schema(&self.definition)
    }

    pub fn spatial_ref(&self) -> Result<Option<SpatialRef>> {
        self.source.spatial_ref(&self.name)
    }

    /// PROJ string and CRS names; `None` for layers without a spatial reference.
    pub fn projection(&self) -> Result<Option<Projection>> {
        Ok(self.spatial_ref()?.map(|srs| srs.projection()))
    }

    pub fn feature_count(&self) -> Result<u64> {
        self.source.feature_count(&self.name)
    }

    /// Every feature of the layer, read into memory.
    pub fn features(&self) -> Result<Vec<Feature>> {
        self.source.read_features(&self.name)
    }

    pub fn snapshot(&self) -> Result<LayerSnapshot> {
        self.source.snapshot(&self.name)
    }

    pub fn slugged_name(&self) -> String {
        slugify(&self.name)
    }

    /// Whether the slug of `name` (default: this layer's name) is already
    /// published.
    pub fn is_known_in_catalog(&self, name: Option<&str>) -> Result<bool> {
        let slug = slugify(name.unwrap_or(&self.name));
        self.portal.catalog.is_layer_known(&slug)
    }

    /// A slug of this layer's name that the catalog does not know yet.
    pub fn generate_unique_name(&self) -> Result<String> {
        unique_layer_name(&self.name, |candidate| {
            self.portal.catalog.is_layer_known(candidate)
        })
    }

    /// Copy the layer into `destination` and return the name it got there.
    ///
    /// Without `overwrite`, a name already present in the destination is
    /// replaced by a unique slug of this layer's own name, free both in the
    /// catalog and in the destination. A failed copy may leave a partial layer
    /// in the destination; removing it is up to the caller.
    pub fn copy_to_source(
        &self,
        destination: &SpatialSource,
        overwrite: bool,
        temporary: bool,
        launder: bool,
        name: Option<&str>,
    ) -> Result<String> {
        if !destination.is_open() {
            return Err(ManagerError::SourceUnavailable);
        }
        let mut target = name.unwrap_or(&self.name).to_string();
        if !overwrite && destination.layer_exists(&target)? {
            target = unique_layer_name(&self.name, |candidate| {
                Ok(self.portal.catalog.is_layer_known(candidate)?
                    || destination.layer_exists(candidate)?)
            })?;
            tracing::debug!(layer = %self.name, target = %target, "destination name taken");
        }
        let options = CopyOptions {
            overwrite,
            temporary,
            launder,
            geometry_name: self.definition.geometry.as_ref().map(|g| g.name.clone()),
        };
        let snapshot = self.snapshot()?;
        destination.copy_layer(&snapshot, &target, &options)
    }

    /// Export to `format` and zip the result into a fresh download directory.
    ///
    /// Scratch files are always removed. On error the download directory is
    /// removed as well, so either the returned archive exists or nothing does.
    pub fn export_as(&self, format: &str, target_name: &str) -> Result<PathBuf> {
        let format: ExportFormat = format.parse()?;
        let file_name = match slugify(target_name) {
            slug if slug.is_empty() => "layer".to_string(),
            slug => slug,
        };

        let scratch = DirGuard::new(self.portal.config.new_temp_dir()?);
        let snapshot = self.snapshot()?;
        export::write_layer(format, &snapshot, scratch.path(), &file_name)?;
        if format == ExportFormat::EsriShapefile {
            export::write_prj(scratch.path(), &file_name, snapshot.srs.as_ref())?;
        }

        let download = DirGuard::new(self.portal.config.new_download_dir()?);
        let archive = download.path().join(format!("{file_name}.zip"));
        export::zip_dir(scratch.path(), &archive)?;
        download.keep();
        tracing::info!(
            layer = %self.name,
            format = %format,
            archive = %archive.display(),
            "layer exported"
        );
        Ok(archive)
    }

    /// Remove the layer from its source.
    pub fn delete(self) -> Result<()> {
        self.source.delete_layer(&self.name)
    }

    pub fn describe(&self) -> Result<LayerSummary> {
        let dimension = self.definition.geometry_dimension();
        let kind = self.definition.geometry_kind();
        Ok(LayerSummary {
            name: self.name.clone(),
            expected_name: self.generate_unique_name()?,
            feature_count: self.feature_count()?,
            geometry_type_name: kind.type_name(dimension),
            geometry_type: kind.type_code(dimension),
            projection: self.projection()?,
            schema: self.full_schema(),
        })
    }
}

/// Directory removed on drop unless [`DirGuard::keep`] was called.
struct DirGuard {
    path: Option<PathBuf>,
}

impl DirGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_dir_all(&path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove directory");
            }
        }
    }
}

fn normalized_slug(name: &str) -> String {
    match slugify(name).to_ascii_lowercase() {
        slug if slug.is_empty() => "layer".to_string(),
        slug => slug,
    }
}

/// Find a lowercase slug of `name` of at most [`MAX_LAYER_NAME_LEN`]
/// characters for which `taken` returns false.
///
/// A short free slug is used as is. Otherwise an 8 character random hex
/// suffix is appended, shortening the stem so the result still fits, and the
/// check repeats on the new name.
pub(crate) fn unique_layer_name<F>(name: &str, mut taken: F) -> Result<String>
where
    F: FnMut(&str) -> Result<bool>,
{
    let mut candidate = normalized_slug(name);
    for _ in 0..MAX_NAME_ATTEMPTS {
        if candidate.len() <= MAX_LAYER_NAME_LEN && !taken(&candidate)? {
            return Ok(candidate);
        }
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        // slugs are ASCII, so byte slicing stays on character boundaries
        let stem_len = candidate.len().min(MAX_LAYER_NAME_LEN - SUFFIX_LEN - 1);
        candidate = normalized_slug(&format!("{}_{}", &candidate[..stem_len], &suffix[..SUFFIX_LEN]));
    }
    Err(ManagerError::Message(format!(
        "no free layer name for '{name}' after {MAX_NAME_ATTEMPTS} attempts"
    )))
}
