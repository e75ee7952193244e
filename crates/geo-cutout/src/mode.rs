//! Conversion between object mode and storable mode.
//!
//! In object mode the `lithology` variable holds [`Lithology`] cells. In
//! storable mode it is replaced by eight string siblings, one per record
//! slot, sharing the composite variable's dims and attrs.

use tracing::{debug, warn};

use crate::dataset::{Dataset, Mode, Variable, VariableData};
use crate::error::{CutoutError, Result};
use crate::lithology::{Lithology, LithologyRecord, LITHOLOGY_SLOTS, LITHOLOGY_VARIABLE};

/// Replace every composite variable with its flat sibling variables.
///
/// A storable dataset is returned unchanged.
pub fn to_storable(dataset: Dataset) -> Result<Dataset> {
    if dataset.mode() == Mode::Storable {
        return Ok(dataset);
    }

    let mut out = dataset;
    let composite: Vec<String> = out
        .variables
        .iter()
        .filter(|(_, v)| v.data.is_composite())
        .map(|(name, _)| name.clone())
        .collect();

    for name in composite {
        if name != LITHOLOGY_VARIABLE {
            return Err(CutoutError::Mode(format!(
                "composite values are only supported in '{}', found them in '{}'",
                LITHOLOGY_VARIABLE, name
            )));
        }
        if let Some(clash) = LITHOLOGY_SLOTS.iter().find(|slot| out.contains(slot)) {
            return Err(CutoutError::Mode(format!(
                "cannot flatten '{}': variable '{}' already exists",
                name, clash
            )));
        }

        let variable = match out.variables.remove(&name) {
            Some(v) => v,
            None => continue,
        };
        let cells = match &variable.data {
            VariableData::Lithology(cells) => cells,
            _ => continue,
        };

        let records: Vec<LithologyRecord> = cells.iter().map(Lithology::encode).collect();
        for (slot_index, slot) in LITHOLOGY_SLOTS.iter().enumerate() {
            let column = records.iter().map(|r| r[slot_index].clone()).collect();
            let sibling = Variable {
                dims: variable.dims.clone(),
                data: VariableData::Text(column),
                attrs: variable.attrs.clone(),
            };
            out.insert_variable(*slot, sibling)?;
        }
        debug!(variable = %name, cells = cells.len(), "Flattened composite variable");
    }

    Ok(out)
}

/// Rebuild the composite variable from its flat siblings.
///
/// Requires all eight siblings with identical dims. A partial set is left
/// alone with a warning. A dataset already in object mode is returned
/// unchanged.
pub fn to_object(dataset: Dataset) -> Result<Dataset> {
    if dataset.mode() == Mode::Object {
        return Ok(dataset);
    }

    let present = LITHOLOGY_SLOTS
        .iter()
        .filter(|slot| dataset.contains(slot))
        .count();
    if present == 0 {
        return Ok(dataset);
    }
    if present < LITHOLOGY_SLOTS.len() {
        warn!(
            present = present,
            expected = LITHOLOGY_SLOTS.len(),
            "Incomplete lithology sibling variables, leaving them flat"
        );
        return Ok(dataset);
    }

    let mut out = dataset;
    let mut columns = Vec::with_capacity(LITHOLOGY_SLOTS.len());
    for slot in LITHOLOGY_SLOTS {
        let variable = out
            .variables
            .remove(slot)
            .ok_or_else(|| CutoutError::Mode(format!("missing sibling variable '{}'", slot)))?;
        columns.push(variable);
    }

    let dims = columns[0].dims.clone();
    let attrs = columns[0].attrs.clone();
    let mut texts: Vec<Vec<Option<String>>> = Vec::with_capacity(columns.len());
    for (slot, variable) in LITHOLOGY_SLOTS.iter().zip(columns) {
        if variable.dims != dims {
            return Err(CutoutError::Mode(format!(
                "sibling '{}' has dims {:?}, expected {:?}",
                slot, variable.dims, dims
            )));
        }
        match variable.data {
            VariableData::Text(values) => texts.push(values),
            other => {
                return Err(CutoutError::Mode(format!(
                    "sibling '{}' holds {} values, expected string",
                    slot,
                    other.dtype()
                )))
            }
        }
    }

    let cells = texts.first().map(Vec::len).unwrap_or(0);
    let mut decoded = Vec::with_capacity(cells);
    for cell in 0..cells {
        let mut record: LithologyRecord = Default::default();
        for (slot, column) in record.iter_mut().zip(&texts) {
            *slot = column[cell].clone();
        }
        let lithology = Lithology::decode(&record).map_err(|e| {
            CutoutError::codec(e.slot, out.cell_label(&dims, cell), e.reason)
        })?;
        decoded.push(lithology);
    }

    out.insert_variable(
        LITHOLOGY_VARIABLE,
        Variable {
            dims,
            data: VariableData::Lithology(decoded),
            attrs,
        },
    )?;
    debug!(cells = cells, "Rebuilt composite variable");
    Ok(out)
}
