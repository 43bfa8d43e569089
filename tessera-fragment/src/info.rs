//! The per-array view over all fragments within a timestamp window, used
//! by readers and the consolidator.

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_error::{tessera_err, TesseraResult};

use crate::io::EncryptionKey;
use crate::meta::FragmentMetadata;
use crate::{
    parallel_for, ArraySchema, MemoryTracker, NDRange, Range, Resources, SchemaMap, Uri,
};

/// A fragment URI with the timestamp range and format version encoded in
/// its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedUri {
    /// The fragment directory URI.
    pub uri: Uri,
    /// The `[t_start, t_end]` window in the fragment name.
    pub timestamp_range: (u64, u64),
    /// The format version in the fragment name (2 for legacy names without
    /// one).
    pub version: u32,
}

/// Parse a fragment directory name of the form
/// `__<t_start>_<t_end>_<uuid>[_<version>]`; a missing version suffix
/// denotes a legacy (v2 or older) fragment.
pub fn parse_fragment_name(name: &str) -> TesseraResult<(u64, u64, u32)> {
    let trimmed = name.strip_prefix("__").ok_or_else(|| {
        tessera_err!(Invalid: "fragment name '{}' does not start with '__'", name)
    })?;
    let parts: Vec<&str> = trimmed.split('_').collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err(tessera_err!(Invalid: "malformed fragment name '{}'", name));
    }
    let t_start: u64 = parts[0]
        .parse()
        .map_err(|_| tessera_err!(Invalid: "malformed fragment name '{}'", name))?;
    let t_end: u64 = parts[1]
        .parse()
        .map_err(|_| tessera_err!(Invalid: "malformed fragment name '{}'", name))?;
    let version: u32 = if parts.len() == 4 {
        parts[3]
            .parse()
            .map_err(|_| tessera_err!(Invalid: "malformed fragment name '{}'", name))?
    } else {
        2
    };
    Ok((t_start, t_end, version))
}

/// Compose a fragment directory name.
pub fn fragment_name(t_start: u64, t_end: u64, uuid: &str, version: u32) -> String {
    format!("__{t_start}_{t_end}_{uuid}_{version}")
}

/// The listing of an array directory: its fragments, vacuum candidates and
/// schemas. Directory layout policy (commit files, consolidation markers)
/// lives upstream; this is the narrow contract the fragment layer needs.
#[derive(Debug)]
pub struct ArrayDirectory {
    array_uri: Uri,
    fragment_uris: Vec<TimestampedUri>,
    to_vacuum: Vec<Uri>,
    schema_latest: Arc<ArraySchema>,
    schemas_all: SchemaMap,
}

impl ArrayDirectory {
    /// Build a directory listing from known parts.
    pub fn new(
        array_uri: Uri,
        fragment_uris: Vec<TimestampedUri>,
        to_vacuum: Vec<Uri>,
        schema_latest: Arc<ArraySchema>,
        schemas_all: SchemaMap,
    ) -> Self {
        Self {
            array_uri,
            fragment_uris,
            to_vacuum,
            schema_latest,
            schemas_all,
        }
    }

    /// List an array directory on disk: every child directory whose name
    /// parses as a fragment, plus the contents of `.vac` files as vacuum
    /// candidates.
    pub fn open(
        resources: &Resources,
        array_uri: Uri,
        schema_latest: Arc<ArraySchema>,
        schemas_all: SchemaMap,
    ) -> TesseraResult<Self> {
        let mut fragment_uris = Vec::new();
        let mut to_vacuum = Vec::new();
        for entry in resources.vfs().ls(&array_uri)? {
            let name = entry.last_path_part().to_string();
            if resources.vfs().is_dir(&entry) {
                if let Ok((t_start, t_end, version)) = parse_fragment_name(&name) {
                    fragment_uris.push(TimestampedUri {
                        uri: entry,
                        timestamp_range: (t_start, t_end),
                        version,
                    });
                }
            } else if name.ends_with(".vac") {
                let size = resources.vfs().file_size(&entry)?;
                let bytes = resources.vfs().read(&entry, 0, size)?;
                let listing = String::from_utf8(bytes.to_vec())
                    .map_err(|_| tessera_err!(Corrupt: "vacuum file {} is not UTF-8", entry))?;
                to_vacuum.extend(
                    listing
                        .lines()
                        .filter(|line| !line.is_empty())
                        .map(Uri::from),
                );
            }
        }
        fragment_uris.sort_by(|a, b| {
            a.timestamp_range
                .0
                .cmp(&b.timestamp_range.0)
                .then_with(|| a.uri.cmp(&b.uri))
        });
        Ok(Self {
            array_uri,
            fragment_uris,
            to_vacuum,
            schema_latest,
            schemas_all,
        })
    }

    /// The array URI.
    pub fn array_uri(&self) -> &Uri {
        &self.array_uri
    }

    /// All fragments found, sorted by `(t_start, uri)`.
    pub fn fragment_uris(&self) -> &[TimestampedUri] {
        &self.fragment_uris
    }

    /// Fragments superseded by consolidation, awaiting vacuum.
    pub fn to_vacuum(&self) -> &[Uri] {
        &self.to_vacuum
    }

    /// The latest schema of the array.
    pub fn schema_latest(&self) -> &Arc<ArraySchema> {
        &self.schema_latest
    }

    /// All schemas of the array keyed by name.
    pub fn schemas_all(&self) -> &SchemaMap {
        &self.schemas_all
    }
}

/// One loaded fragment inside a [`FragmentInfo`].
#[derive(Debug, Clone)]
pub struct SingleFragmentInfo {
    meta: Arc<FragmentMetadata>,
    fragment_size: u64,
}

impl SingleFragmentInfo {
    /// The wrapped metadata.
    pub fn meta(&self) -> &Arc<FragmentMetadata> {
        &self.meta
    }

    /// The fragment URI.
    pub fn uri(&self) -> &Uri {
        self.meta.fragment_uri()
    }

    /// The fragment name.
    pub fn name(&self) -> &str {
        self.meta.fragment_name()
    }

    /// The fragment format version.
    pub fn version(&self) -> u32 {
        self.meta.format_version()
    }

    /// The fragment timestamp range.
    pub fn timestamp_range(&self) -> (u64, u64) {
        self.meta.timestamp_range()
    }

    /// Whether the fragment is dense.
    pub fn dense(&self) -> bool {
        self.meta.dense()
    }

    /// Whether the fragment is sparse.
    pub fn sparse(&self) -> bool {
        !self.meta.dense()
    }

    /// The number of cells in the fragment.
    pub fn cell_num(&self) -> u64 {
        self.meta.cell_num()
    }

    /// Total size in bytes of the fragment's files.
    pub fn fragment_size(&self) -> u64 {
        self.fragment_size
    }

    /// Whether the footer came from consolidated metadata.
    pub fn has_consolidated_metadata(&self) -> bool {
        self.meta.has_consolidated_footer()
    }

    /// The fragment's non-empty domain.
    pub fn non_empty_domain(&self) -> NDRange {
        self.meta.non_empty_domain()
    }
}

/// Information about all fragments of an array under a timestamp window.
///
/// The fragment vector stays sorted by `(t_start, uri)`; fragments strictly
/// before the window contribute only their non-empty domain, unioned into
/// the anterior range.
pub struct FragmentInfo {
    array_uri: Uri,
    resources: Arc<Resources>,
    memory_tracker: Arc<MemoryTracker>,
    encryption_key: EncryptionKey,
    single_fragment_info_vec: Vec<SingleFragmentInfo>,
    to_vacuum: Vec<Uri>,
    unconsolidated_metadata_num: u32,
    anterior_ndrange: NDRange,
    schema_latest: Option<Arc<ArraySchema>>,
    schemas_all: SchemaMap,
    timestamp_start: u64,
    timestamp_end: u64,
    loaded: bool,
}

impl FragmentInfo {
    /// Create an unloaded view for the given array.
    pub fn new(
        array_uri: Uri,
        resources: Arc<Resources>,
        memory_tracker: Arc<MemoryTracker>,
    ) -> Self {
        Self {
            array_uri,
            resources,
            memory_tracker,
            encryption_key: EncryptionKey::no_encryption(),
            single_fragment_info_vec: Vec::new(),
            to_vacuum: Vec::new(),
            unconsolidated_metadata_num: 0,
            anterior_ndrange: NDRange::new(),
            schema_latest: None,
            schemas_all: SchemaMap::default(),
            timestamp_start: 0,
            timestamp_end: u64::MAX,
            loaded: false,
        }
    }

    /// Set the encryption key used for metadata reads.
    ///
    /// Must be called before [`FragmentInfo::load`].
    pub fn set_encryption_key(&mut self, key: EncryptionKey) -> TesseraResult<()> {
        if self.loaded {
            return Err(tessera_err!(
                Invalid: "cannot change the encryption key of loaded fragment info"
            ));
        }
        self.encryption_key = key;
        Ok(())
    }

    /// Load the fragments of `array_dir` whose timestamp ranges intersect
    /// `[timestamp_start, timestamp_end]`, in parallel; fragments entirely
    /// before the window are loaded only to union their non-empty domains
    /// into the anterior range. Callers normalize the window so that
    /// `timestamp_start <= timestamp_end`.
    pub fn load(
        &mut self,
        array_dir: &ArrayDirectory,
        timestamp_start: u64,
        timestamp_end: u64,
    ) -> TesseraResult<()> {
        self.timestamp_start = timestamp_start;
        self.timestamp_end = timestamp_end;
        self.schema_latest = Some(array_dir.schema_latest().clone());
        self.schemas_all = array_dir.schemas_all().clone();
        self.to_vacuum = array_dir.to_vacuum().to_vec();
        self.single_fragment_info_vec.clear();
        self.anterior_ndrange = NDRange::new();

        let relevant: Vec<&TimestampedUri> = array_dir
            .fragment_uris()
            .iter()
            .filter(|f| f.timestamp_range.0 <= timestamp_end)
            .collect();

        let loaded: Mutex<Vec<Option<SingleFragmentInfo>>> =
            Mutex::new(vec![None; relevant.len()]);
        parallel_for(0, relevant.len() as u64, |f| {
            self.resources.check_cancelled()?;
            let info = self.load_one(relevant[f as usize])?;
            loaded.lock()[f as usize] = Some(info);
            Ok(())
        })?;

        let schema_latest = array_dir.schema_latest().clone();
        let domain = schema_latest.domain().clone();
        let mut in_window = Vec::new();
        for info in loaded.into_inner().into_iter().flatten() {
            let (_, t_end) = info.timestamp_range();
            if t_end < timestamp_start {
                // Anterior fragment: only its non-empty domain survives.
                let ned = info.non_empty_domain();
                if !ned.is_empty() {
                    domain.expand_ndrange(&ned, &mut self.anterior_ndrange);
                }
            } else {
                in_window.push(info);
            }
        }
        in_window.sort_by(|a, b| {
            a.timestamp_range()
                .0
                .cmp(&b.timestamp_range().0)
                .then_with(|| a.uri().cmp(b.uri()))
        });
        self.unconsolidated_metadata_num = in_window
            .iter()
            .filter(|info| !info.has_consolidated_metadata())
            .count() as u32;
        self.single_fragment_info_vec = in_window;
        self.loaded = true;
        Ok(())
    }

    fn load_one(&self, fragment: &TimestampedUri) -> TesseraResult<SingleFragmentInfo> {
        let schema_latest = self
            .schema_latest
            .clone()
            .ok_or_else(|| tessera_err!(Invalid: "fragment info has no schema"))?;
        let mut meta = FragmentMetadata::for_reading(
            self.resources.clone(),
            self.memory_tracker.clone(),
            schema_latest,
            fragment.uri.clone(),
            fragment.timestamp_range,
            fragment.version,
        );
        meta.load(&self.encryption_key, None, &self.schemas_all)?;
        let fragment_size = meta.fragment_size()?;
        Ok(SingleFragmentInfo {
            meta: Arc::new(meta),
            fragment_size,
        })
    }

    /// Load the consolidated fragment at `new_fragment_uri` and replace the
    /// contiguous run of fragments named by `to_replace` with it, keeping
    /// the vector sorted.
    pub fn load_and_replace(
        &mut self,
        new_fragment_uri: &Uri,
        to_replace: &[TimestampedUri],
    ) -> TesseraResult<()> {
        self.ensure_loaded()?;
        if to_replace.is_empty() {
            return Err(tessera_err!(Invalid: "nothing to replace"));
        }
        let name = new_fragment_uri.last_path_part();
        let (t_start, t_end, version) = parse_fragment_name(name)?;
        let new_info = self.load_one(&TimestampedUri {
            uri: new_fragment_uri.clone(),
            timestamp_range: (t_start, t_end),
            version,
        })?;

        let first = self
            .single_fragment_info_vec
            .iter()
            .position(|info| info.uri() == &to_replace[0].uri)
            .ok_or_else(|| {
                tessera_err!(Invalid: "fragment {} not present in fragment info", to_replace[0].uri)
            })?;
        let last = first + to_replace.len();
        if last > self.single_fragment_info_vec.len() {
            return Err(tessera_err!(
                Invalid: "fragments to replace exceed the loaded fragment info"
            ));
        }
        for (offset, replaced) in to_replace.iter().enumerate() {
            if self.single_fragment_info_vec[first + offset].uri() != &replaced.uri {
                return Err(tessera_err!(
                    Invalid: "fragments to replace are not a contiguous run at {}", replaced.uri
                ));
            }
        }

        self.single_fragment_info_vec
            .splice(first..last, std::iter::once(new_info));
        self.unconsolidated_metadata_num = self
            .single_fragment_info_vec
            .iter()
            .filter(|info| !info.has_consolidated_metadata())
            .count() as u32;
        Ok(())
    }

    fn ensure_loaded(&self) -> TesseraResult<()> {
        if !self.loaded {
            return Err(tessera_err!(Invalid: "fragment info has not been loaded"));
        }
        Ok(())
    }

    /// The array URI.
    pub fn array_uri(&self) -> &Uri {
        &self.array_uri
    }

    /// The number of fragments loaded within the window.
    pub fn fragment_num(&self) -> u32 {
        self.single_fragment_info_vec.len() as u32
    }

    /// Per-fragment info, sorted by `(t_start, uri)`.
    pub fn single_fragment_info_vec(&self) -> &[SingleFragmentInfo] {
        &self.single_fragment_info_vec
    }

    /// The fragment at `fid`.
    pub fn fragment(&self, fid: u32) -> TesseraResult<&SingleFragmentInfo> {
        self.ensure_loaded()?;
        self.single_fragment_info_vec
            .get(fid as usize)
            .ok_or_else(|| tessera_err!(Invalid: "invalid fragment index {}", fid))
    }

    /// URIs of fragments awaiting vacuum.
    pub fn to_vacuum(&self) -> &[Uri] {
        &self.to_vacuum
    }

    /// Number of fragments awaiting vacuum.
    pub fn to_vacuum_num(&self) -> u32 {
        self.to_vacuum.len() as u32
    }

    /// Number of loaded fragments whose metadata is not consolidated.
    pub fn unconsolidated_metadata_num(&self) -> u32 {
        self.unconsolidated_metadata_num
    }

    /// The union of non-empty domains of fragments strictly before the
    /// window.
    pub fn anterior_ndrange(&self) -> &NDRange {
        &self.anterior_ndrange
    }

    /// Union an extra range into the anterior domain.
    pub fn expand_anterior_ndrange(&mut self, range: &NDRange) -> TesseraResult<()> {
        let schema = self
            .schema_latest
            .as_ref()
            .ok_or_else(|| tessera_err!(Invalid: "fragment info has no schema"))?;
        schema
            .domain()
            .expand_ndrange(range, &mut self.anterior_ndrange);
        Ok(())
    }

    /// The latest schema.
    pub fn schema_latest(&self) -> Option<&Arc<ArraySchema>> {
        self.schema_latest.as_ref()
    }

    /// All schemas keyed by name.
    pub fn schemas_all(&self) -> &SchemaMap {
        &self.schemas_all
    }

    /// The non-empty domain of fragment `fid` on dimension `did`.
    pub fn get_non_empty_domain(&self, fid: u32, did: usize) -> TesseraResult<Range> {
        let info = self.fragment(fid)?;
        let ned = info.non_empty_domain();
        ned.get(did)
            .cloned()
            .ok_or_else(|| tessera_err!(Invalid: "invalid dimension index {}", did))
    }

    /// Number of MBRs of sparse fragment `fid`, loading the R-tree on
    /// demand.
    pub fn get_mbr_num(&self, fid: u32) -> TesseraResult<u64> {
        let info = self.fragment(fid)?;
        if info.dense() {
            return Err(tessera_err!(Invalid: "dense fragments have no MBRs"));
        }
        info.meta().load_rtree(&self.encryption_key)?;
        Ok(info.meta().mbrs()?.len() as u64)
    }

    /// The `mid`-th MBR of sparse fragment `fid`, loading the R-tree on
    /// demand.
    pub fn get_mbr(&self, fid: u32, mid: u64) -> TesseraResult<NDRange> {
        let info = self.fragment(fid)?;
        if info.dense() {
            return Err(tessera_err!(Invalid: "dense fragments have no MBRs"));
        }
        info.meta().load_rtree(&self.encryption_key)?;
        if mid >= info.meta().mbrs()?.len() as u64 {
            return Err(tessera_err!(Invalid: "invalid MBR index {}", mid));
        }
        info.meta().mbr(mid)
    }

    /// Timestamp range of fragment `fid`.
    pub fn get_timestamp_range(&self, fid: u32) -> TesseraResult<(u64, u64)> {
        Ok(self.fragment(fid)?.timestamp_range())
    }

    /// Format version of fragment `fid`.
    pub fn get_version(&self, fid: u32) -> TesseraResult<u32> {
        Ok(self.fragment(fid)?.version())
    }

    /// Cell count of fragment `fid`.
    pub fn get_cell_num(&self, fid: u32) -> TesseraResult<u64> {
        Ok(self.fragment(fid)?.cell_num())
    }

    /// Total cell count across the loaded fragments.
    pub fn get_total_cell_num(&self) -> TesseraResult<u64> {
        self.ensure_loaded()?;
        Ok(self
            .single_fragment_info_vec
            .iter()
            .map(SingleFragmentInfo::cell_num)
            .sum())
    }

    /// Size in bytes of fragment `fid`.
    pub fn get_fragment_size(&self, fid: u32) -> TesseraResult<u64> {
        Ok(self.fragment(fid)?.fragment_size())
    }

    /// Write a plain-text report of the loaded fragments.
    pub fn dump(&self, out: &mut dyn std::io::Write) -> TesseraResult<()> {
        writeln!(out, "- Fragment num: {}", self.fragment_num())?;
        writeln!(out, "- To vacuum num: {}", self.to_vacuum_num())?;
        writeln!(
            out,
            "- Unconsolidated metadata num: {}",
            self.unconsolidated_metadata_num
        )?;
        for (i, info) in self.single_fragment_info_vec.iter().enumerate() {
            writeln!(out, "- Fragment #{}:", i + 1)?;
            writeln!(out, "  > URI: {}", info.uri())?;
            writeln!(out, "  > Type: {}", if info.dense() { "dense" } else { "sparse" })?;
            writeln!(out, "  > Format version: {}", info.version())?;
            let (t1, t2) = info.timestamp_range();
            writeln!(out, "  > Timestamp range: [{t1}, {t2}]")?;
            writeln!(out, "  > Cell num: {}", info.cell_num())?;
            writeln!(out, "  > Size: {}", info.fragment_size())?;
        }
        Ok(())
    }
}
