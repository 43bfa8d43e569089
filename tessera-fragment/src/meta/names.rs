//! Column-file naming per format version.

use tessera_error::{tessera_err, TesseraResult};

use crate::meta::FragmentMetadata;
use crate::{
    Uri, COORDS, DELETE_CONDITION_INDEX, DELETE_TIMESTAMPS, FILE_SUFFIX,
    FRAGMENT_METADATA_FILENAME, TIMESTAMPS,
};

/// Percent-encodings applied to column names at format version 8: the
/// RFC 3986 reserved set plus characters illegal in Windows file names.
const PERCENT_ENCODING: &[(char, &str)] = &[
    ('!', "%21"),
    ('#', "%23"),
    ('$', "%24"),
    ('%', "%25"),
    ('&', "%26"),
    ('\'', "%27"),
    ('(', "%28"),
    (')', "%29"),
    ('*', "%2A"),
    ('+', "%2B"),
    (',', "%2C"),
    ('/', "%2F"),
    (':', "%3A"),
    (';', "%3B"),
    ('=', "%3D"),
    ('?', "%3F"),
    ('@', "%40"),
    ('[', "%5B"),
    (']', "%5D"),
    ('"', "%22"),
    ('<', "%20"),
    ('>', "%2D"),
    ('\\', "%30"),
    ('|', "%3C"),
];

impl FragmentMetadata {
    /// The on-disk name of a column.
    ///
    /// Up to format version 7 the column name is used directly; version 8
    /// percent-encodes filesystem-hostile characters; version 9 onward
    /// replaces names with stable tokens (`a<idx>` for attributes,
    /// `d<dim_idx>` for dimensions, and fixed tokens for the special
    /// columns), which also makes attribute renames cheap.
    pub fn encode_name(&self, name: &str) -> TesseraResult<String> {
        if self.version <= 7 {
            return Ok(name.to_string());
        }

        if self.version == 8 {
            let mut encoded = String::with_capacity(name.len());
            for c in name.chars() {
                match PERCENT_ENCODING.iter().find(|(raw, _)| *raw == c) {
                    Some((_, escape)) => encoded.push_str(escape),
                    None => encoded.push(c),
                }
            }
            return Ok(encoded);
        }

        let idx = self.idx(name)?;
        if self
            .schema
            .attributes()
            .iter()
            .any(|attr| attr.name() == name)
        {
            return Ok(format!("a{idx}"));
        }
        if self.schema.is_dim(name) {
            let dim_idx = idx - self.schema.attribute_num() - 1;
            return Ok(format!("d{dim_idx}"));
        }
        match name {
            COORDS => Ok(name.to_string()),
            TIMESTAMPS => Ok("t".to_string()),
            DELETE_TIMESTAMPS => Ok("dt".to_string()),
            DELETE_CONDITION_INDEX => Ok("dci".to_string()),
            _ => Err(tessera_err!(
                Invalid: "unable to locate dimension or attribute '{}'", name
            )),
        }
    }

    /// URI of the column's fixed-data file.
    pub fn uri(&self, name: &str) -> TesseraResult<Uri> {
        let encoded = self.encode_name(name)?;
        Ok(self.fragment_uri.join_path(&format!("{encoded}{FILE_SUFFIX}")))
    }

    /// URI of the column's var-data file.
    pub fn var_uri(&self, name: &str) -> TesseraResult<Uri> {
        let encoded = self.encode_name(name)?;
        Ok(self
            .fragment_uri
            .join_path(&format!("{encoded}_var{FILE_SUFFIX}")))
    }

    /// URI of the column's validity file.
    pub fn validity_uri(&self, name: &str) -> TesseraResult<Uri> {
        let encoded = self.encode_name(name)?;
        Ok(self
            .fragment_uri
            .join_path(&format!("{encoded}_validity{FILE_SUFFIX}")))
    }

    /// URI of the fragment metadata file.
    pub(crate) fn meta_uri(&self) -> Uri {
        self.fragment_uri.join_path(FRAGMENT_METADATA_FILENAME)
    }
}
