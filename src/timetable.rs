//! Class timetable grids: editing, CSV import and the downloadable template.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BOM: char = '\u{feff}';

#[derive(Debug, Error)]
pub enum TimetableError {
    #[error("O arquivo CSV está vazio.")]
    Empty,

    #[error("O arquivo não está em UTF-8.")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("Erro ao ler CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Erro ao gravar CSV: {0}")]
    Io(#[from] std::io::Error),
}

/// A grid of periods (rows) by classes (columns). The first column holds the period times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timetable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Default for Timetable {
    fn default() -> Self {
        Self {
            headers: vec![
                "Horário".to_string(),
                "Turma A".to_string(),
                "Turma B".to_string(),
            ],
            rows: vec![vec![String::new(); 3]],
        }
    }
}

impl Timetable {
    pub fn set_header(&mut self, column: usize, value: impl Into<String>) {
        if let Some(h) = self.headers.get_mut(column) {
            *h = value.into();
        }
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: impl Into<String>) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value.into();
        }
    }

    /// Append a class column named after the next letter ("Turma C", "Turma D", ...).
    pub fn add_column(&mut self) {
        let letter = char::from_u32(65 + (self.headers.len() as u32).saturating_sub(1)).unwrap_or('?');
        self.headers.push(format!("Turma {letter}"));
        for row in &mut self.rows {
            row.push(String::new());
        }
    }

    /// Remove a column unless it is the last one left.
    pub fn remove_column(&mut self, column: usize) -> bool {
        if self.headers.len() <= 1 || column >= self.headers.len() {
            return false;
        }
        self.headers.remove(column);
        for row in &mut self.rows {
            if column < row.len() {
                row.remove(column);
            }
        }
        true
    }

    pub fn add_row(&mut self) {
        self.rows.push(vec![String::new(); self.headers.len()]);
    }

    /// Remove a row unless it is the last one left.
    pub fn remove_row(&mut self, row: usize) -> bool {
        if self.rows.len() <= 1 || row >= self.rows.len() {
            return false;
        }
        self.rows.remove(row);
        true
    }

    /// Parse an uploaded CSV. The first non-blank line becomes the headers.
    pub fn from_csv(bytes: &[u8]) -> Result<Self, TimetableError> {
        let text = std::str::from_utf8(bytes)?;
        let text = text.strip_prefix(BOM).unwrap_or(text);

        let first_line = text.lines().find(|l| !l.trim().is_empty()).ok_or(TimetableError::Empty)?;
        let delimiter = if first_line.contains(';') { b';' } else { b',' };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut lines = Vec::new();
        for record in reader.records() {
            let record = record?;
            let cells: Vec<String> = record.iter().map(clean_cell).collect();
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            lines.push(cells);
        }

        let mut lines = lines.into_iter();
        let headers = lines.next().ok_or(TimetableError::Empty)?;
        let width = headers.len();
        let mut rows: Vec<Vec<String>> = lines
            .map(|mut r| {
                r.resize(width, String::new());
                r
            })
            .collect();
        if rows.is_empty() {
            rows.push(vec![String::new(); width]);
        }

        tracing::debug!(columns = width, rows = rows.len(), "Imported timetable CSV");
        Ok(Self { headers, rows })
    }

    /// Serialize as `;`-separated CSV prefixed with a BOM for spreadsheet apps.
    pub fn to_csv(&self) -> Result<Vec<u8>, TimetableError> {
        let mut out = Vec::new();
        out.extend_from_slice(BOM.to_string().as_bytes());
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(b';')
                .flexible(true)
                .from_writer(&mut out);
            writer.write_record(&self.headers)?;
            for row in &self.rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        Ok(out)
    }

    /// Example grid offered as a download so users see the expected layout.
    pub fn template() -> Self {
        let row = |cells: &[&str]| cells.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        Self {
            headers: row(&["Horário", "6º Ano A", "6º Ano B", "7º Ano A"]),
            rows: vec![
                row(&["", "Sala 16", "Sala 17", "Sala 14"]),
                row(&["07:20 - 08:10", "Rosane", "D.Gatti", "Felipe"]),
            ],
        }
    }
}

fn clean_cell(cell: &str) -> String {
    let cell = cell.trim();
    let cell = cell
        .strip_prefix('"')
        .and_then(|c| c.strip_suffix('"'))
        .unwrap_or(cell);
    cell.trim().to_string()
}

/// Stored timetable for one unit, weekday label and school segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassSchedule {
    pub unit: String,
    pub day_of_week: String,
    pub segment: String,
    pub schedule_data: Timetable,
}

impl ClassSchedule {
    /// Blank grid for a key with nothing stored yet.
    pub fn empty(
        unit: impl Into<String>,
        day_of_week: impl Into<String>,
        segment: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            day_of_week: day_of_week.into(),
            segment: segment.into(),
            schedule_data: Timetable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid() {
        let t = Timetable::default();
        assert_eq!(t.headers, vec!["Horário", "Turma A", "Turma B"]);
        assert_eq!(t.rows, vec![vec!["", "", ""]]);
    }

    #[test]
    fn test_add_column_names_next_letter() {
        let mut t = Timetable::default();
        t.add_column();
        assert_eq!(t.headers.last().map(String::as_str), Some("Turma C"));
        assert_eq!(t.rows[0].len(), 4);
        t.add_column();
        assert_eq!(t.headers.last().map(String::as_str), Some("Turma D"));
    }

    #[test]
    fn test_remove_keeps_last_column_and_row() {
        let mut t = Timetable {
            headers: vec!["Horário".to_string()],
            rows: vec![vec![String::new()]],
        };
        assert!(!t.remove_column(0));
        assert!(!t.remove_row(0));
        assert_eq!(t.headers.len(), 1);
        assert_eq!(t.rows.len(), 1);
    }

    #[test]
    fn test_remove_column_drops_cells() {
        let mut t = Timetable::default();
        t.set_cell(0, 1, "Rosane");
        t.set_cell(0, 2, "Felipe");
        assert!(t.remove_column(1));
        assert_eq!(t.headers, vec!["Horário", "Turma B"]);
        assert_eq!(t.rows[0], vec!["", "Felipe"]);
    }

    #[test]
    fn test_add_and_remove_rows() {
        let mut t = Timetable::default();
        t.add_row();
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1].len(), 3);
        assert!(t.remove_row(0));
        assert_eq!(t.rows.len(), 1);
    }

    #[test]
    fn test_set_out_of_range_is_ignored() {
        let mut t = Timetable::default();
        t.set_cell(5, 5, "x");
        t.set_header(9, "y");
        assert_eq!(t, Timetable::default());
    }

    #[test]
    fn test_import_semicolon_with_bom() {
        let csv = "\u{feff}Horário;6º Ano A;6º Ano B\n07:20 - 08:10; Rosane ;D.Gatti\n\n";
        let t = Timetable::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(t.headers, vec!["Horário", "6º Ano A", "6º Ano B"]);
        assert_eq!(t.rows, vec![vec!["07:20 - 08:10", "Rosane", "D.Gatti"]]);
    }

    #[test]
    fn test_import_comma_with_quotes() {
        let csv = "Horário,Turma A\r\n\"07:20\",\"Felipe\"\r\n,\r\n08:10,Rosane\r\n";
        let t = Timetable::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(t.headers, vec!["Horário", "Turma A"]);
        assert_eq!(
            t.rows,
            vec![vec!["07:20", "Felipe"], vec!["08:10", "Rosane"]]
        );
    }

    #[test]
    fn test_import_pads_short_rows() {
        let csv = "Horário;A;B\n07:20;x\n";
        let t = Timetable::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(t.rows[0], vec!["07:20", "x", ""]);
    }

    #[test]
    fn test_import_empty_fails() {
        assert!(matches!(
            Timetable::from_csv(b"\n \n"),
            Err(TimetableError::Empty)
        ));
    }

    #[test]
    fn test_import_rejects_non_utf8() {
        assert!(matches!(
            Timetable::from_csv(&[0x48, 0x6f, 0x72, 0xe1, 0x72, 0x69, 0x6f]),
            Err(TimetableError::Encoding(_))
        ));
    }

    #[test]
    fn test_template_csv_starts_with_bom_and_reimports() {
        let bytes = Timetable::template().to_csv().unwrap();
        assert!(bytes.starts_with("\u{feff}".as_bytes()));

        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("Horário;6º Ano A;6º Ano B;7º Ano A"));

        let back = Timetable::from_csv(&bytes).unwrap();
        assert_eq!(back, Timetable::template());
    }
}
