//! Reduction of per-tile statistics into the per-fragment roll-up, run
//! once by the writer after all tiles are recorded.

use rayon::prelude::*;
use tessera_dtype::{match_each_float_datatype, match_each_integer_datatype, Datatype, NativeType};
use tessera_error::TesseraResult;

use crate::meta::{CoarseState, FragmentMetadata};
use crate::{has_min_max_metadata, has_sum_metadata, ColumnInfo};

struct Rollup {
    min: Option<Vec<u8>>,
    max: Option<Vec<u8>>,
    sum: Option<[u8; 8]>,
    null_count: u64,
}

impl FragmentMetadata {
    /// Reduce the per-tile min/max/sum/null-count vectors into the
    /// per-fragment roll-up, one column per task across the compute pool.
    ///
    /// Null counts sum plainly; sums saturate at their type's extremum;
    /// min/max skip tiles whose cells are all null; dense dimension
    /// columns carry no statistics.
    pub fn compute_fragment_min_max_sum_null_count(&mut self) -> TesseraResult<()> {
        let tile_num = self.tile_num();
        let dense = self.dense;
        let cells_per_tile = if dense {
            self.schema.domain().cell_num_per_tile()
        } else {
            self.schema.capacity()
        };
        let last_tile_cell_num = self.last_tile_cell_num();
        let cell_num_in = move |t: u64| -> u64 {
            if dense || t != tile_num - 1 {
                cells_per_tile
            } else {
                last_tile_cell_num
            }
        };

        let schema = self.schema.clone();
        let names = self.idx_names.clone();
        let num = names.len();

        let state = self.state.get_mut();
        let rollups: Vec<Rollup> = {
            let inputs: &CoarseState = state;
            (0..num)
                .into_par_iter()
                .map(|i| -> TesseraResult<Rollup> {
                    let info = schema.column(&names[i])?;
                    Ok(column_rollup(
                        inputs,
                        i,
                        &info,
                        dense,
                        tile_num,
                        &cell_num_in,
                    ))
                })
                .collect::<TesseraResult<Vec<_>>>()?
        };

        for (i, rollup) in rollups.into_iter().enumerate() {
            state.fragment_null_counts[i] = rollup.null_count;
            if let Some(min) = rollup.min {
                state.fragment_mins[i] = min;
            }
            if let Some(max) = rollup.max {
                state.fragment_maxs[i] = max;
            }
            if let Some(sum) = rollup.sum {
                state.fragment_sums[i] = sum;
            }
        }
        Ok(())
    }
}

fn column_rollup(
    state: &CoarseState,
    idx: usize,
    info: &ColumnInfo,
    dense: bool,
    tile_num: u64,
    cell_num_in: &(dyn Fn(u64) -> u64 + Sync),
) -> Rollup {
    let null_count: u64 = state.tile_null_counts[idx].iter().sum();
    let mut rollup = Rollup {
        min: None,
        max: None,
        sum: None,
        null_count,
    };

    // No statistics for dense dimension columns.
    if dense && info.is_dim {
        return rollup;
    }

    let nullable = info.nullable();
    let null_counts = &state.tile_null_counts[idx];
    let tile_is_null = |t: u64| -> bool {
        nullable && null_counts.get(t as usize).copied() == Some(cell_num_in(t))
    };

    let has_min_max =
        has_min_max_metadata(info.datatype, info.is_dim, info.var_size(), info.cell_val_num);
    let has_sum = has_sum_metadata(info.datatype, info.var_size(), info.cell_val_num);

    if info.var_size() {
        if has_min_max {
            let (min, max) = rollup_var(
                &state.tile_min_buffer[idx],
                &state.tile_min_var_buffer[idx],
                &state.tile_max_buffer[idx],
                &state.tile_max_var_buffer[idx],
                tile_num,
                &tile_is_null,
            );
            rollup.min = min;
            rollup.max = max;
        }
        return rollup;
    }

    if has_min_max {
        if info.datatype == Datatype::StringAscii {
            let n = info.cell_size() as usize;
            let (min, max) = rollup_string_fixed(
                &state.tile_min_buffer[idx],
                &state.tile_max_buffer[idx],
                n,
                tile_num,
                &tile_is_null,
            );
            rollup.min = min;
            rollup.max = max;
        } else {
            let (min, max) = if info.datatype.is_integer() {
                match_each_integer_datatype!(info.datatype, |$T| rollup_min_max::<$T>(
                    &state.tile_min_buffer[idx],
                    &state.tile_max_buffer[idx],
                    tile_num,
                    &tile_is_null,
                ))
            } else {
                match_each_float_datatype!(info.datatype, |$T| rollup_min_max::<$T>(
                    &state.tile_min_buffer[idx],
                    &state.tile_max_buffer[idx],
                    tile_num,
                    &tile_is_null,
                ))
            };
            rollup.min = Some(min);
            rollup.max = Some(max);
        }
    }

    if has_sum {
        let sums = &state.tile_sums[idx];
        let sum = if info.datatype.is_signed_int() {
            rollup_sum_i64(sums, tile_num, &tile_is_null)
        } else if info.datatype.is_unsigned_int() {
            rollup_sum_u64(sums, tile_num, &tile_is_null)
        } else {
            rollup_sum_f64(sums, tile_num, &tile_is_null)
        };
        rollup.sum = Some(sum);
    }

    rollup
}

fn rollup_min_max<T: NativeType>(
    mins: &[u8],
    maxs: &[u8],
    tile_num: u64,
    tile_is_null: &dyn Fn(u64) -> bool,
) -> (Vec<u8>, Vec<u8>) {
    let size = std::mem::size_of::<T>();
    let mut min = T::max_value();
    let mut max = T::min_value();
    for t in 0..tile_num {
        if tile_is_null(t) {
            continue;
        }
        let at = t as usize * size;
        let tile_min = T::try_from_le_bytes(&mins[at..at + size]).unwrap_or(min);
        let tile_max = T::try_from_le_bytes(&maxs[at..at + size]).unwrap_or(max);
        if tile_min.total_compare(min) == std::cmp::Ordering::Less {
            min = tile_min;
        }
        if tile_max.total_compare(max) == std::cmp::Ordering::Greater {
            max = tile_max;
        }
    }
    (min.to_le_bytes().to_vec(), max.to_le_bytes().to_vec())
}

fn rollup_string_fixed(
    mins: &[u8],
    maxs: &[u8],
    cell_size: usize,
    tile_num: u64,
    tile_is_null: &dyn Fn(u64) -> bool,
) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let mut min: Option<&[u8]> = None;
    let mut max: Option<&[u8]> = None;
    for t in 0..tile_num {
        if tile_is_null(t) {
            continue;
        }
        let at = t as usize * cell_size;
        let tile_min = &mins[at..at + cell_size];
        let tile_max = &maxs[at..at + cell_size];
        if min.is_none() || tile_min < min.unwrap_or(tile_min) {
            min = Some(tile_min);
        }
        if max.is_none() || tile_max > max.unwrap_or(tile_max) {
            max = Some(tile_max);
        }
    }
    (min.map(<[u8]>::to_vec), max.map(<[u8]>::to_vec))
}

fn rollup_var(
    min_offsets: &[u8],
    min_var: &[u8],
    max_offsets: &[u8],
    max_var: &[u8],
    tile_num: u64,
    tile_is_null: &dyn Fn(u64) -> bool,
) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let value_at = |offsets: &[u8], var: &[u8], t: u64| -> Vec<u8> {
        let at = |i: usize| -> usize {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&offsets[i * 8..i * 8 + 8]);
            u64::from_le_bytes(bytes) as usize
        };
        let start = at(t as usize);
        let end = if t == tile_num - 1 {
            var.len()
        } else {
            at(t as usize + 1)
        };
        var[start..end].to_vec()
    };

    let mut min: Option<Vec<u8>> = None;
    let mut max: Option<Vec<u8>> = None;
    for t in 0..tile_num {
        if tile_is_null(t) {
            continue;
        }
        let tile_min = value_at(min_offsets, min_var, t);
        let tile_max = value_at(max_offsets, max_var, t);
        // Byte-lexicographic; ties break toward the shorter min and the
        // longer max.
        match &min {
            None => min = Some(tile_min),
            Some(current) => {
                if tile_min < *current {
                    min = Some(tile_min);
                }
            }
        }
        match &max {
            None => max = Some(tile_max),
            Some(current) => {
                if tile_max > *current {
                    max = Some(tile_max);
                }
            }
        }
    }
    (min, max)
}

fn rollup_sum_i64(sums: &[u8], tile_num: u64, tile_is_null: &dyn Fn(u64) -> bool) -> [u8; 8] {
    let mut acc: i64 = 0;
    for t in 0..tile_num {
        if tile_is_null(t) {
            continue;
        }
        let at = t as usize * 8;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&sums[at..at + 8]);
        let value = i64::from_le_bytes(bytes);
        match acc.checked_add(value) {
            Some(next) => acc = next,
            None => {
                acc = if value > 0 { i64::MAX } else { i64::MIN };
                break;
            }
        }
    }
    acc.to_le_bytes()
}

fn rollup_sum_u64(sums: &[u8], tile_num: u64, tile_is_null: &dyn Fn(u64) -> bool) -> [u8; 8] {
    let mut acc: u64 = 0;
    for t in 0..tile_num {
        if tile_is_null(t) {
            continue;
        }
        let at = t as usize * 8;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&sums[at..at + 8]);
        match acc.checked_add(u64::from_le_bytes(bytes)) {
            Some(next) => acc = next,
            None => {
                acc = u64::MAX;
                break;
            }
        }
    }
    acc.to_le_bytes()
}

fn rollup_sum_f64(sums: &[u8], tile_num: u64, tile_is_null: &dyn Fn(u64) -> bool) -> [u8; 8] {
    let mut acc: f64 = 0.0;
    for t in 0..tile_num {
        if tile_is_null(t) {
            continue;
        }
        let at = t as usize * 8;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&sums[at..at + 8]);
        let value = f64::from_le_bytes(bytes);
        if acc.is_sign_negative() == value.is_sign_negative()
            && acc.abs() > f64::MAX - value.abs()
        {
            acc = if acc < 0.0 { f64::MIN } else { f64::MAX };
            break;
        }
        acc += value;
    }
    acc.to_le_bytes()
}
