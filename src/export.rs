use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::db::Record;

pub const HEADER: [&str; 3] = ["title", "rating", "subject"];

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write one delimited row, quoting cells that need it.
pub fn write_row<W: Write>(mut w: W, row: &[&str], sep: char) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, "{}", sep)?;
        }
        if needs_quotes(cell, sep) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)
}

/// Header line plus one row per record. Missing fields are empty cells.
pub fn write_records<W: Write>(mut w: W, records: &[Record], sep: char) -> io::Result<()> {
    write_row(&mut w, &HEADER, sep)?;
    for r in records {
        let rating = r.rating.map(|v| v.to_string()).unwrap_or_default();
        write_row(
            &mut w,
            &[
                r.title.as_deref().unwrap_or(""),
                rating.as_str(),
                r.subject.as_deref().unwrap_or(""),
            ],
            sep,
        )?;
    }
    Ok(())
}

pub fn export_file(path: &Path, records: &[Record], sep: char) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut w = BufWriter::new(file);
    write_records(&mut w, records, sep)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        let records = vec![
            Record {
                title: Some("肖申克的救赎".into()),
                rating: Some(9.7),
                subject: Some("希望让人自由。".into()),
            },
            Record {
                title: Some("Crouching Tiger, Hidden Dragon".into()),
                rating: None,
                subject: Some("say \"hi\"".into()),
            },
        ];
        let mut buf = Vec::new();
        write_records(&mut buf, &records, ',').unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(
            out,
            "title,rating,subject\n\
             肖申克的救赎,9.7,希望让人自由。\n\
             \"Crouching Tiger, Hidden Dragon\",,\"say \"\"hi\"\"\"\n"
        );
    }

    #[test]
    fn tab_separated() {
        let records = vec![Record {
            title: Some("a, b".into()),
            rating: Some(9.0),
            subject: None,
        }];
        let mut buf = Vec::new();
        write_records(&mut buf, &records, '\t').unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "title\trating\tsubject\na, b\t9\t\n");
    }

    #[test]
    fn export_file_writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top250.csv");
        export_file(&path, &[], ',').unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "title,rating,subject\n");
    }
}
