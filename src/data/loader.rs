//! Delimited text loader.
//!
//! Reads `label<sep>feature...` rows (TAB, comma or space separated) and the
//! optional side files `P.weight`, `P.query` and `P.init` next to the data
//! file. The first column is the label.

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::data::{Dataset, DatasetBuilder};
use crate::error::{Error, Result};

/// Load a dataset from a delimited text file.
///
/// When `reference` is given (training dataset), its bin mappers are reused.
pub fn load_from_file(
    path: &str,
    config: &Config,
    reference: Option<&Dataset>,
) -> Result<Dataset> {
    let content = fs::read_to_string(path)?;
    let mut label = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut num_data = 0usize;

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line
            .split(|c: char| c == '\t' || c == ',' || c == ' ')
            .filter(|f| !f.is_empty())
            .collect();
        if columns.is_empty() {
            if fields.len() < 2 {
                return Err(Error::DataShape(format!(
                    "{}: expected a label and at least one feature",
                    path
                )));
            }
            columns = vec![Vec::new(); fields.len() - 1];
        } else if fields.len() != columns.len() + 1 {
            return Err(Error::DataShape(format!(
                "{}:{}: expected {} fields, found {}",
                path,
                line_no + 1,
                columns.len() + 1,
                fields.len()
            )));
        }
        label.push(parse_field(path, line_no, fields[0])? as f32);
        for (j, field) in fields[1..].iter().enumerate() {
            columns[j].push(parse_field(path, line_no, field)?);
        }
        num_data += 1;
    }

    let mut builder = DatasetBuilder::new(config);
    if let Some(reference) = reference {
        builder = builder.reference(reference);
    }
    let mut dataset = builder.from_columns(columns, num_data, &label)?;
    load_side_files(path, config, &mut dataset)?;
    Ok(dataset)
}

fn parse_field(path: &str, line_no: usize, field: &str) -> Result<f64> {
    field.parse().map_err(|_| {
        Error::DataShape(format!("{}:{}: cannot parse '{}'", path, line_no + 1, field))
    })
}

/// Read `P.weight`, `P.query` and `P.init` if they exist.
fn load_side_files(path: &str, config: &Config, dataset: &mut Dataset) -> Result<()> {
    let weight_path = format!("{}.weight", path);
    if Path::new(&weight_path).exists() {
        let weights = read_column(&weight_path)?;
        let weights: Vec<f32> = weights.iter().map(|&v| v as f32).collect();
        dataset.metadata_mut().set_weights(&weights)?;
    }

    let query_path = format!("{}.query", path);
    if Path::new(&query_path).exists() {
        let counts = read_column(&query_path)?;
        let counts: Vec<usize> = counts.iter().map(|&v| v as usize).collect();
        dataset.metadata_mut().set_query_counts(&counts)?;
    }

    let init_path = format!("{}.init", path);
    if Path::new(&init_path).exists() {
        let init = read_init_scores(&init_path, config.num_class, dataset.num_data())?;
        dataset.metadata_mut().set_init_score(&init)?;
    }
    Ok(())
}

fn read_column(path: &str) -> Result<Vec<f64>> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, l)| parse_field(path, i, l))
        .collect()
}

/// One init score per line, or `num_class` tab-separated scores per line.
/// The result is class-major.
fn read_init_scores(path: &str, num_class: usize, num_data: usize) -> Result<Vec<f64>> {
    let content = fs::read_to_string(path)?;
    let mut per_row: Vec<Vec<f64>> = Vec::new();
    for (i, line) in content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
    {
        let scores: Vec<f64> = line
            .split('\t')
            .filter(|f| !f.is_empty())
            .map(|f| parse_field(path, i, f))
            .collect::<Result<_>>()?;
        if scores.len() != num_class {
            return Err(Error::DataShape(format!(
                "{}:{}: expected {} init scores per row",
                path,
                i + 1,
                num_class
            )));
        }
        per_row.push(scores);
    }
    if per_row.len() != num_data {
        return Err(Error::DataShape(format!(
            "{}: {} init rows for {} data rows",
            path,
            per_row.len(),
            num_data
        )));
    }
    let mut class_major = vec![0.0; num_data * num_class];
    for (row, scores) in per_row.iter().enumerate() {
        for (k, &s) in scores.iter().enumerate() {
            class_major[k * num_data + row] = s;
        }
    }
    Ok(class_major)
}
