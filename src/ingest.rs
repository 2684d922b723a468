use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::{debug, warn};

use crate::error::{KpiError, Result};
use crate::models::{ObjectiveRow, ObjectiveSheet, ResultsRow, TYPE_SENTINEL};

pub const AGENT_COLUMN: &str = "Agent";
pub const MONTH_COLUMN: &str = "Mois";

/// A loaded spreadsheet: trimmed headers and raw text cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub source: String,
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

pub fn load_sheet(path: &Path, delimiter: u8) -> Result<Sheet> {
    let file = std::fs::File::open(path).map_err(|err| KpiError::persistence(path, err))?;
    read_sheet(file, delimiter, &path.display().to_string())
}

pub fn read_sheet<R: Read>(reader: R, delimiter: u8, source: &str) -> Result<Sheet> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);

    let headers = reader
        .headers()?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(|cell| cell.trim().to_string()).collect());
    }

    debug!(source, rows = records.len(), "sheet loaded");
    Ok(Sheet {
        source: source.to_string(),
        headers,
        records,
    })
}

impl Sheet {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    /// Distinct values of a column, in first-seen order.
    pub fn distinct(&self, name: &str) -> Vec<String> {
        let Some(index) = self.column(name) else {
            return Vec::new();
        };
        let mut values: Vec<String> = Vec::new();
        for record in &self.records {
            let value = cell(record, index);
            if !values.iter().any(|existing| existing == value) {
                values.push(value.to_string());
            }
        }
        values
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| {
            KpiError::contract(format!("{}: missing required column {name}", self.source))
        })
    }

    fn numeric_columns(&self, kpis: &[String]) -> Result<Vec<(String, usize)>> {
        kpis.iter()
            .map(|kpi| -> Result<(String, usize)> { Ok((kpi.clone(), self.require(kpi)?)) })
            .collect()
    }

    /// Reads the results sheet for the given KPI columns.
    pub fn to_results(&self, kpis: &[String]) -> Result<Vec<ResultsRow>> {
        let agent = self.require(AGENT_COLUMN)?;
        let month = self.require(MONTH_COLUMN)?;
        let columns = self.numeric_columns(kpis)?;

        self.records
            .iter()
            .enumerate()
            .map(|(line, record)| -> Result<ResultsRow> {
                Ok(ResultsRow {
                    agent: cell(record, agent).to_string(),
                    month: cell(record, month).to_string(),
                    values: self.parse_values(record, line, &columns)?,
                })
            })
            .collect()
    }

    /// Reads the objectives sheet, keeping the `Type` row apart as raw text.
    pub fn to_objectives(&self, kpis: &[String]) -> Result<ObjectiveSheet> {
        let month = self.require(MONTH_COLUMN)?;
        let columns = self.numeric_columns(kpis)?;

        let mut sheet = ObjectiveSheet::default();
        for (line, record) in self.records.iter().enumerate() {
            let label = cell(record, month);
            if label == TYPE_SENTINEL {
                if sheet.type_row.is_some() {
                    warn!(source = %self.source, "duplicate Type row ignored");
                    continue;
                }
                let modes = self
                    .headers
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| *index != month)
                    .map(|(index, header)| (header.clone(), cell(record, index).to_string()))
                    .collect();
                sheet.type_row = Some(modes);
                continue;
            }

            sheet.rows.push(ObjectiveRow {
                month: label.to_string(),
                values: self.parse_values(record, line, &columns)?,
            });
        }
        Ok(sheet)
    }

    fn parse_values(
        &self,
        record: &[String],
        line: usize,
        columns: &[(String, usize)],
    ) -> Result<BTreeMap<String, Option<f64>>> {
        columns
            .iter()
            .map(|(kpi, index)| -> Result<(String, Option<f64>)> {
                let raw = cell(record, *index);
                let value = parse_number(raw).map_err(|_| {
                    KpiError::contract(format!(
                        "{}: row {}, column {kpi}: {raw:?} is not a number",
                        self.source,
                        line + 2
                    ))
                })?;
                Ok((kpi.clone(), value))
            })
            .collect()
    }
}

fn cell(record: &[String], index: usize) -> &str {
    record.get(index).map(String::as_str).unwrap_or("")
}

/// Empty and `NaN` cells are missing; a decimal comma is accepted.
pub fn parse_number(raw: &str) -> std::result::Result<Option<f64>, std::num::ParseFloatError> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let value: f64 = raw.replace(',', ".").parse()?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS: &str = "\u{feff}Agent;Mois;DMT (sec);Qualité (%)\n\
        A1;2024-01;220;95\n\
        A2;2024-01;180,5;\n";

    const OBJECTIVES: &str = "Mois,DMT (sec),Qualité (%)\n\
        Type, MIN ,max\n\
        2024-01,200,100\n";

    fn kpis() -> Vec<String> {
        vec!["DMT (sec)".to_string(), "Qualité (%)".to_string()]
    }

    #[test]
    fn reads_results_with_semicolons_and_decimal_commas() {
        let sheet = read_sheet(RESULTS.as_bytes(), b';', "results").unwrap();
        assert_eq!(sheet.headers[0], "Agent");

        let rows = sheet.to_results(&kpis()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value("DMT (sec)"), Some(220.0));
        assert_eq!(rows[1].value("DMT (sec)"), Some(180.5));
        assert_eq!(rows[1].value("Qualité (%)"), None);
    }

    #[test]
    fn splits_type_row_from_objectives() {
        let sheet = read_sheet(OBJECTIVES.as_bytes(), b',', "objectives").unwrap();
        let objectives = sheet.to_objectives(&kpis()).unwrap();

        let modes = objectives.type_row.unwrap();
        assert_eq!(modes["DMT (sec)"], "MIN");
        assert_eq!(modes["Qualité (%)"], "max");
        assert_eq!(objectives.rows.len(), 1);
        assert_eq!(objectives.rows[0].value("DMT (sec)"), Some(200.0));
    }

    #[test]
    fn missing_columns_violate_the_contract() {
        let sheet = read_sheet("Mois,Prod\n2024-01,10\n".as_bytes(), b',', "results").unwrap();
        let err = sheet.to_results(&["Prod".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Agent"));

        let err = sheet.to_objectives(&kpis()).unwrap_err();
        assert!(matches!(err, KpiError::InputContractViolation(_)));
    }

    #[test]
    fn objectives_without_month_column_violate_the_contract() {
        let sheet = read_sheet(
            "Periode,DMT (sec),Qualité (%)\nType,min,max\n2024-01,200,100\n".as_bytes(),
            b',',
            "objectives.csv",
        )
        .unwrap();
        let err = sheet.to_objectives(&kpis()).unwrap_err();
        assert!(matches!(err, KpiError::InputContractViolation(_)));
        assert!(err.to_string().contains("objectives.csv: missing required column Mois"));
    }

    #[test]
    fn type_row_never_reaches_numbers_or_the_join() {
        let results = read_sheet(
            "Agent,Mois,DMT (sec),Qualité (%)\nA1,2024-01,220,95\nA1,2024-02,210,99\n".as_bytes(),
            b',',
            "results.csv",
        )
        .unwrap();
        let objectives = read_sheet(
            "Mois,DMT (sec),Qualité (%)\n2024-01,200,100\nType,min,max\n2024-02,210,98\n".as_bytes(),
            b',',
            "objectives.csv",
        )
        .unwrap();

        let config = crate::config::resolve(&results, None, Default::default()).unwrap();
        assert_eq!(config.kpis, vec!["Qualité (%)", "DMT (sec)"]);

        let sheet = objectives.to_objectives(&config.kpis).unwrap();
        let months: Vec<&str> = sheet.rows.iter().map(|row| row.month.as_str()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02"]);

        let rows = crate::deviation::evaluate(
            &results.to_results(&config.kpis).unwrap(),
            &sheet,
            &config,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.month != TYPE_SENTINEL));

        let january = &rows[0];
        assert_eq!(january.kpi("DMT (sec)").unwrap().deviation, 0.1);
        assert_eq!(january.kpi("Qualité (%)").unwrap().deviation, 0.05);
        assert!((january.score_global - 0.075).abs() < 1e-12);
        assert_eq!(rows[1].kpi("DMT (sec)").unwrap().deviation, 0.0);
        assert_eq!(rows[1].kpi("Qualité (%)").unwrap().deviation, -0.0102);
    }

    #[test]
    fn non_numeric_cells_are_reported_with_position() {
        let sheet = read_sheet(
            "Agent,Mois,Prod\nA1,2024-01,oops\n".as_bytes(),
            b',',
            "results.csv",
        )
        .unwrap();
        let err = sheet.to_results(&["Prod".to_string()]).unwrap_err();
        assert!(err.to_string().contains("results.csv: row 2, column Prod"));
    }

    #[test]
    fn distinct_keeps_first_seen_order() {
        let sheet = read_sheet(RESULTS.as_bytes(), b';', "results").unwrap();
        assert_eq!(sheet.distinct(MONTH_COLUMN), vec!["2024-01"]);
        assert_eq!(sheet.distinct(AGENT_COLUMN), vec!["A1", "A2"]);
    }

    #[test]
    fn parses_missing_markers() {
        assert_eq!(parse_number("").unwrap(), None);
        assert_eq!(parse_number(" NaN ").unwrap(), None);
        assert_eq!(parse_number("0").unwrap(), Some(0.0));
        assert!(parse_number("n/a").is_err());
    }
}
