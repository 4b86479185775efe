use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{Column, ColumnData, DataType, Table};

/// File extension for the binary table format.
pub const EXTENSION: &str = "skyt";

const MAGIC: &[u8; 4] = b"SKYT";
const VERSION: u32 = 1;

/// Upper bound on capacity reserved from header counts; larger tables grow as read.
const PREALLOC_LIMIT: usize = 1 << 16;

fn write_u8(w: &mut impl Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_str(w: &mut impl Write, s: &str) -> io::Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_str(r: &mut impl Read) -> io::Result<String> {
    let len = read_u32(r)? as u64;
    let mut buf = Vec::with_capacity((len as usize).min(PREALLOC_LIMIT));
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated string"));
    }
    String::from_utf8(buf).map_err(|e| invalid_data(format!("invalid UTF-8: {e}")))
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn dtype_tag(dtype: DataType) -> u8 {
    match dtype {
        DataType::Int => 0,
        DataType::Float => 1,
        DataType::Text => 2,
    }
}

fn dtype_from_tag(tag: u8) -> io::Result<DataType> {
    match tag {
        0 => Ok(DataType::Int),
        1 => Ok(DataType::Float),
        2 => Ok(DataType::Text),
        _ => Err(invalid_data(format!("unknown column type tag: {tag}"))),
    }
}

/// Layout: magic, version, row count, column count, then for each column its
/// name, type tag and one (validity byte, value) pair per row.
impl Table {
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        self.write_to(&mut w)?;
        w.flush()
    }

    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(MAGIC)?;
        write_u32(w, VERSION)?;
        write_u64(w, self.num_rows() as u64)?;
        write_u32(w, self.num_columns() as u32)?;

        for col in self.columns() {
            write_str(w, &col.name)?;
            write_u8(w, dtype_tag(col.dtype()))?;
            match &col.data {
                ColumnData::Int(v) => {
                    for cell in v {
                        write_u8(w, cell.is_some() as u8)?;
                        w.write_all(&cell.unwrap_or(0).to_le_bytes())?;
                    }
                }
                ColumnData::Float(v) => {
                    for cell in v {
                        write_u8(w, cell.is_some() as u8)?;
                        w.write_all(&cell.unwrap_or(0.0).to_le_bytes())?;
                    }
                }
                ColumnData::Text(v) => {
                    for cell in v {
                        write_u8(w, cell.is_some() as u8)?;
                        write_str(w, cell.as_deref().unwrap_or(""))?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> io::Result<Table> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);
        Self::read_from(&mut r)
    }

    pub fn read_from(r: &mut impl Read) -> io::Result<Table> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(invalid_data("invalid magic bytes"));
        }

        let version = read_u32(r)?;
        if version != VERSION {
            return Err(invalid_data(format!("unsupported version: {version}")));
        }

        let num_rows = read_u64(r)? as usize;
        let num_cols = read_u32(r)? as usize;

        let mut columns = Vec::with_capacity(num_cols.min(PREALLOC_LIMIT));
        for _ in 0..num_cols {
            let name = read_str(r)?;
            let data = match dtype_from_tag(read_u8(r)?)? {
                DataType::Int => {
                    let mut v = Vec::with_capacity(num_rows.min(PREALLOC_LIMIT));
                    for _ in 0..num_rows {
                        let valid = read_u8(r)? != 0;
                        let value = read_u64(r)? as i64;
                        v.push(valid.then_some(value));
                    }
                    ColumnData::Int(v)
                }
                DataType::Float => {
                    let mut v = Vec::with_capacity(num_rows.min(PREALLOC_LIMIT));
                    for _ in 0..num_rows {
                        let valid = read_u8(r)? != 0;
                        let value = f64::from_bits(read_u64(r)?);
                        v.push(valid.then_some(value));
                    }
                    ColumnData::Float(v)
                }
                DataType::Text => {
                    let mut v = Vec::with_capacity(num_rows.min(PREALLOC_LIMIT));
                    for _ in 0..num_rows {
                        let valid = read_u8(r)? != 0;
                        let value = read_str(r)?;
                        v.push(valid.then_some(value));
                    }
                    ColumnData::Text(v)
                }
            };
            columns.push(Column::new(name, data));
        }

        let mut table = Table::new(columns).map_err(|e| invalid_data(e.to_string()))?;
        if table.num_columns() == 0 {
            table.num_rows = num_rows;
        }
        Ok(table)
    }
}
