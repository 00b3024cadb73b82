// In: src/schema.rs

//! Reconciles the column contracts of an ordered list of pipeline stages.
//!
//! The resolution is pure set arithmetic: it decides which columns a run must
//! fetch from a persisted source (everything the stages need that no earlier
//! stage produces, plus whatever the source holds that the run will not
//! recompute) and which transient columns to forget when the session ends.

use crate::types::column::{column_names, Column, ColumnSet};

//==================================================================================
// I. The Stage Contract
//==================================================================================

/// The column contract a pipeline stage declares.
pub trait ColumnContract {
    /// Columns that must be present before the stage runs.
    fn input_columns(&self) -> &[Column];

    /// Columns guaranteed present after the stage runs.
    fn output_columns(&self) -> &[Column];

    /// Columns the stage needs only transiently; they are dropped from the
    /// record table when the session ends.
    fn forget_columns(&self) -> &[Column] {
        &[]
    }
}

/// A plain, declarative `ColumnContract`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageColumns {
    pub name: String,
    pub input_columns: Vec<Column>,
    pub output_columns: Vec<Column>,
    pub forget_columns: Vec<Column>,
}

impl StageColumns {
    pub fn new(name: impl Into<String>, input_columns: &[Column], output_columns: &[Column]) -> Self {
        Self {
            name: name.into(),
            input_columns: input_columns.to_vec(),
            output_columns: output_columns.to_vec(),
            forget_columns: Vec::new(),
        }
    }

    pub fn forgetting(mut self, forget_columns: &[Column]) -> Self {
        self.forget_columns = forget_columns.to_vec();
        self
    }
}

impl ColumnContract for StageColumns {
    fn input_columns(&self) -> &[Column] {
        &self.input_columns
    }

    fn output_columns(&self) -> &[Column] {
        &self.output_columns
    }

    fn forget_columns(&self) -> &[Column] {
        &self.forget_columns
    }
}

//==================================================================================
// II. Resolution
//==================================================================================

/// The reconciled column sets of a whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnResolution {
    /// Union of every stage's inputs minus the outputs of strictly earlier stages.
    pub input_columns: ColumnSet,
    /// Union of every stage's outputs.
    pub output_columns: ColumnSet,
    /// Every stage's forget columns, concatenated in stage order.
    pub forget_columns: Vec<Column>,
}

impl ColumnResolution {
    /// Folds the stage contracts in pipeline order.
    pub fn resolve<'a, I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = &'a S>,
        S: ColumnContract + ?Sized + 'a,
    {
        let mut resolution = Self::default();
        for stage in stages {
            // Inputs are checked against outputs *before* this stage adds its own.
            resolution.input_columns.extend(
                stage
                    .input_columns()
                    .iter()
                    .filter(|c| !resolution.output_columns.contains(*c)),
            );
            resolution
                .output_columns
                .extend(stage.output_columns().iter().copied());
            resolution
                .forget_columns
                .extend_from_slice(stage.forget_columns());
        }
        log::debug!(
            "Resolved stage columns: inputs {:?}, outputs {:?}, forget {:?}",
            column_names(&resolution.input_columns),
            column_names(&resolution.output_columns),
            resolution.forget_columns
        );
        resolution
    }

    /// The columns to fetch from a persisted source holding `source_columns`.
    pub fn load_columns(&self, source_columns: &ColumnSet) -> ColumnSet {
        let mut load: ColumnSet = source_columns
            .difference(&self.output_columns)
            .copied()
            .collect();
        load.extend(self.input_columns.iter().copied());
        load.insert(Column::ImageId);
        load.insert(Column::VideoId);
        load
    }
}
