use std::fs::File;
use std::path::Path;
use log::{info, warn, error};
use serde::Deserialize;
use calamine::{Data, Range, Reader, Xlsx, open_workbook};
use crate::profile::Query;

/// One input row. `row` is the 1-based data row number, used to write results back.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    pub row: usize,
    pub query: Query,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "FirstName", alias = "first_name", alias = "First Name", alias = "Förnamn", alias = "fornamn")]
    first_name: Option<String>,
    #[serde(rename = "LastName", alias = "last_name", alias = "Last Name", alias = "Efternamn", alias = "efternamn")]
    last_name: Option<String>,
    #[serde(rename = "PersonNumber", alias = "national_id", alias = "Personnummer", alias = "personnummer", alias = "PNr")]
    national_id: Option<String>,
}

pub fn load_records<P: AsRef<Path>>(filename: P) -> Vec<PersonRecord> {
    let path_ref = filename.as_ref();

    if !path_ref.exists() {
        error!("Input file {:?} does not exist.", path_ref);
        return Vec::new();
    }

    let is_excel = path_ref.extension().map_or(false, |ext| ext == "xlsx" || ext == "xlsm");
    if is_excel {
        return load_excel(path_ref);
    }

    load_csv(path_ref)
}

fn to_record(row: usize, first: Option<String>, last: Option<String>, id: Option<String>) -> Option<PersonRecord> {
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    match (clean(first), clean(last), clean(id)) {
        (Some(first), Some(last), Some(id)) => Some(PersonRecord {
            row,
            query: Query::new(first, last, id),
        }),
        _ => {
            warn!("Skipping row {}: first name, last name and person number are all required", row);
            None
        }
    }
}

fn load_csv(path: &Path) -> Vec<PersonRecord> {
    let mut records = Vec::new();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            error!("Could not open CSV file: {}", e);
            return records;
        }
    };

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    for (i, result) in rdr.deserialize::<CsvRow>().enumerate() {
        match result {
            Ok(r) => records.extend(to_record(i + 1, r.first_name, r.last_name, r.national_id)),
            Err(e) => error!("Error parsing CSV row {}: {}", i + 1, e),
        }
    }
    info!("Loaded {} people from CSV {:?}", records.len(), path);
    records
}

fn load_excel(path: &Path) -> Vec<PersonRecord> {
    let mut excel: Xlsx<_> = match open_workbook(path) {
        Ok(wb) => wb,
        Err(e) => {
            error!("Could not open Excel file: {}", e);
            return Vec::new();
        }
    };

    let worksheets = excel.worksheets();
    let Some((_name, range)) = worksheets.first() else {
        warn!("Workbook {:?} has no sheets", path);
        return Vec::new();
    };

    let records = sheet_records(range);
    info!("Loaded {} people from Excel {:?}", records.len(), path);
    records
}

/// Column positions of first name, last name and person number, found by header keyword.
fn header_columns(header: &[Data]) -> Option<(usize, usize, usize)> {
    let mut first_idx = None;
    let mut last_idx = None;
    let mut id_idx = None;

    for (col_idx, cell) in header.iter().enumerate() {
        let header = cell.to_string().to_lowercase();
        if header.contains("first") || header.contains("förnamn") || header.contains("fornamn") {
            first_idx = Some(col_idx);
        } else if header.contains("last") || header.contains("efternamn") {
            last_idx = Some(col_idx);
        } else if header.contains("person") || header.contains("pnr") || header.contains("national") {
            id_idx = Some(col_idx);
        }
    }
    Some((first_idx?, last_idx?, id_idx?))
}

fn sheet_records(range: &Range<Data>) -> Vec<PersonRecord> {
    let mut rows = range.rows();
    let Some(columns) = rows.next().and_then(header_columns) else {
        error!("Excel header must name first name, last name and person number columns");
        return Vec::new();
    };
    let (first_idx, last_idx, id_idx) = columns;

    rows.enumerate()
        .filter_map(|(i, row)| {
            let cell = |idx: usize| row.get(idx).map(|c| c.to_string());
            to_record(i + 1, cell(first_idx), cell(last_idx), cell(id_idx))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_csv_rows_become_queries() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Förnamn,Efternamn,Personnummer").unwrap();
        writeln!(file, "Johanna , Hallberg,19720111").unwrap();
        writeln!(file, "Nils,,19800101").unwrap();
        writeln!(file, "Anette,Brännström,19730218").unwrap();

        let records = load_records(file.path());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row, 1);
        assert_eq!(records[0].query, Query::new("Johanna", "Hallberg", "19720111"));
        assert_eq!(records[1].row, 3);
    }

    fn sheet(cells: &[&[Data]]) -> Range<Data> {
        let width = cells.iter().map(|r| r.len()).max().unwrap_or(1) as u32;
        let mut range = Range::new((0, 0), (cells.len() as u32 - 1, width - 1));
        for (r, row) in cells.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                range.set_value((r as u32, c as u32), value.clone());
            }
        }
        range
    }

    fn text(s: &str) -> Data {
        Data::String(s.to_string())
    }

    #[test]
    fn test_excel_header_detection_in_any_order() {
        let header = [text("Personnummer"), text("Rad"), text("Efternamn"), text("Förnamn")];
        assert_eq!(header_columns(&header), Some((3, 2, 0)));

        let english = [text("First Name"), text("Last Name"), text("National ID")];
        assert_eq!(header_columns(&english), Some((0, 1, 2)));

        assert_eq!(header_columns(&[text("Company"), text("Website")]), None);
    }

    #[test]
    fn test_excel_rows_become_queries() {
        let range = sheet(&[
            &[text("Förnamn"), text("Efternamn"), text("Personnummer")],
            &[text("Johanna"), text("Hallberg"), Data::Float(19720111.0)],
            &[text("Nils"), Data::Empty, text("19800101")],
            &[text(" Anette "), text("Brännström"), text("19730218")],
        ]);

        let records = sheet_records(&range);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], PersonRecord { row: 1, query: Query::new("Johanna", "Hallberg", "19720111") });
        assert_eq!(records[1], PersonRecord { row: 3, query: Query::new("Anette", "Brännström", "19730218") });
    }

    #[test]
    fn test_excel_without_identity_headers_yields_nothing() {
        let range = sheet(&[&[text("Company"), text("Country")], &[text("Acme"), text("SE")]]);
        assert!(sheet_records(&range).is_empty());
    }

    #[test]
    fn test_unreadable_workbook_yields_nothing() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        writeln!(file, "not a zip archive").unwrap();
        assert!(load_records(file.path()).is_empty());
    }

    #[test]
    fn test_missing_file_yields_nothing() {
        assert!(load_records("/definitely/not/here.csv").is_empty());
    }
}
