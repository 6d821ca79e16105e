use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;
/// Refuse headers larger than this many blocks
const MAX_HEADER_BLOCKS: usize = 1000;

/// Ordered keyword/value pairs of one FITS header
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Header {
    keywords: Vec<(String, String)>,
}

impl Header {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        // Fortran-style exponents are legal in FITS
        self.get(key)
            .and_then(|v| v.replace('D', "E").parse::<f64>().ok())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| {
            v.parse::<i64>()
                .ok()
                .or_else(|| v.parse::<f64>().ok().map(|f| f as i64))
        })
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get_i64(key)
            .and_then(|v| usize::try_from(v).ok())
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keywords.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HduKind {
    Primary,
    Image,
    BinTable,
    Other(String),
}

/// Location and header of one header-data unit
#[derive(Debug, Clone)]
pub struct HduInfo {
    pub index: usize,
    pub kind: HduKind,
    pub header: Header,
    pub data_start: u64,
    pub data_bytes: u64,
}

impl HduInfo {
    pub fn name(&self) -> Option<&str> {
        self.header.get("EXTNAME")
    }

    pub fn bitpix(&self) -> i64 {
        self.header.get_i64("BITPIX").unwrap_or(8)
    }

    pub fn axes(&self) -> Vec<usize> {
        let naxis = self.header.get_usize("NAXIS").unwrap_or(0);
        (1..=naxis)
            .map(|i| self.header.get_usize(&format!("NAXIS{}", i)).unwrap_or(0))
            .collect()
    }

    pub fn holds_image(&self) -> bool {
        matches!(self.kind, HduKind::Primary | HduKind::Image) && self.data_bytes > 0
    }

    /// Number of pixels when this HDU is a non-degenerate 2-D image
    pub fn image_2d_size(&self) -> Option<usize> {
        if !self.holds_image() {
            return None;
        }
        let axes = self.axes();
        (axes.len() == 2 && axes[0] > 0 && axes[1] > 0).then(|| axes[0] * axes[1])
    }

    /// Number of samples when this HDU is a 1-D image
    pub fn image_1d_len(&self) -> Option<usize> {
        if !self.holds_image() {
            return None;
        }
        let axes = self.axes();
        (axes.len() == 1 && axes[0] > 0).then(|| axes[0])
    }
}

/// Walk every HDU in a FITS file, reading headers only
pub fn scan_hdus(path: &Path) -> Result<Vec<HduInfo>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut hdus = Vec::new();
    let mut offset = 0u64;

    while offset + BLOCK_SIZE as u64 <= file_len {
        reader.seek(SeekFrom::Start(offset))?;
        let (header, header_bytes) = match read_header_blocks(&mut reader)? {
            Some(found) => found,
            None => break,
        };

        let kind = if hdus.is_empty() {
            if header.get("SIMPLE").is_none() {
                anyhow::bail!("Not a FITS file (missing SIMPLE): {}", path.display());
            }
            HduKind::Primary
        } else {
            match header.get("XTENSION").map(|v| v.trim().to_uppercase()) {
                Some(x) if x == "IMAGE" => HduKind::Image,
                Some(x) if x == "BINTABLE" => HduKind::BinTable,
                Some(x) => HduKind::Other(x),
                // Trailing bytes after the last HDU
                None => break,
            }
        };

        let data_start = offset + header_bytes;
        let data_bytes = data_size(&header);
        hdus.push(HduInfo {
            index: hdus.len(),
            kind,
            header,
            data_start,
            data_bytes,
        });
        offset = data_start + padded(data_bytes);
    }

    if hdus.is_empty() {
        anyhow::bail!("No HDUs found in {}", path.display());
    }
    Ok(hdus)
}

fn padded(bytes: u64) -> u64 {
    let block = BLOCK_SIZE as u64;
    bytes.div_ceil(block) * block
}

/// Data segment size in bytes, honouring PCOUNT/GCOUNT
fn data_size(header: &Header) -> u64 {
    let naxis = header.get_usize("NAXIS").unwrap_or(0);
    if naxis == 0 {
        return 0;
    }
    let bytes_per = (header.get_i64("BITPIX").unwrap_or(8).unsigned_abs() / 8).max(1);
    let product: u64 = (1..=naxis)
        .map(|i| header.get_usize(&format!("NAXIS{}", i)).unwrap_or(0) as u64)
        .product();
    let pcount = header.get_i64("PCOUNT").unwrap_or(0).max(0) as u64;
    let gcount = header.get_i64("GCOUNT").unwrap_or(1).max(1) as u64;
    bytes_per * gcount * (pcount + product)
}

/// Read header blocks until END, returning the parsed header and its size
fn read_header_blocks<R: Read>(reader: &mut R) -> Result<Option<(Header, u64)>> {
    let mut header_data = Vec::new();
    loop {
        let mut block = vec![0u8; BLOCK_SIZE];
        if reader.read_exact(&mut block).is_err() {
            if header_data.is_empty() {
                return Ok(None);
            }
            anyhow::bail!("Truncated FITS header");
        }
        let has_end = block
            .chunks(CARD_SIZE)
            .any(|card| card.starts_with(b"END") && card[3..].iter().all(|&b| b == b' '));
        header_data.extend_from_slice(&block);
        if has_end {
            break;
        }
        if header_data.len() > MAX_HEADER_BLOCKS * BLOCK_SIZE {
            anyhow::bail!("FITS header has no END card");
        }
    }
    let size = header_data.len() as u64;
    Ok(Some((parse_fits_header(&header_data), size)))
}

/// Parse 80-character header cards into keyword/value pairs
pub fn parse_fits_header(data: &[u8]) -> Header {
    let mut keywords = Vec::new();

    for chunk in data.chunks(CARD_SIZE) {
        let card = String::from_utf8_lossy(chunk);
        let keyword = card.get(..8).unwrap_or(&card).trim();

        if keyword == "END" {
            break;
        }
        if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
            continue;
        }
        // Value indicator lives in columns 9-10
        if card.get(8..10) != Some("= ") {
            continue;
        }

        let value = parse_card_value(card.get(10..).unwrap_or(""));
        keywords.push((keyword.to_string(), value));
    }

    Header { keywords }
}

fn parse_card_value(field: &str) -> String {
    let field = field.trim_start();
    if let Some(rest) = field.strip_prefix('\'') {
        // Quoted string, '' escapes a quote
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return out.trim_end().to_string();
    }
    match field.find('/') {
        Some(comment_pos) => field[..comment_pos].trim().to_string(),
        None => field.trim().to_string(),
    }
}

/// Read a primary or IMAGE HDU's data as `f64`, applying BSCALE/BZERO
pub fn read_image_data(path: &Path, hdu: &HduInfo) -> Result<Vec<f64>> {
    if !hdu.holds_image() {
        anyhow::bail!("HDU {} does not hold image data", hdu.index);
    }
    let count: usize = hdu.axes().iter().product();
    let bitpix = hdu.bitpix();
    let bscale = hdu.header.get_f64("BSCALE").unwrap_or(1.0);
    let bzero = hdu.header.get_f64("BZERO").unwrap_or(0.0);

    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    reader.seek(SeekFrom::Start(hdu.data_start))?;

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = match bitpix {
            8 => reader.read_u8()? as f64,
            16 => reader.read_i16::<BigEndian>()? as f64,
            32 => reader.read_i32::<BigEndian>()? as f64,
            64 => reader.read_i64::<BigEndian>()? as f64,
            -32 => reader.read_f32::<BigEndian>()? as f64,
            -64 => reader.read_f64::<BigEndian>()?,
            other => anyhow::bail!("Unsupported BITPIX {}", other),
        };
        values.push(raw * bscale + bzero);
    }
    Ok(values)
}

/// One numeric binary-table column, rows flattened in order
#[derive(Debug, Clone)]
pub struct TableColumn {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct BinTable {
    pub columns: Vec<TableColumn>,
}

impl BinTable {
    /// Column lookup for loosely named products, ignoring case.
    ///
    /// Only answers when some column is named exactly `name`; the result is
    /// then the first column whose name contains `name`.
    pub fn find_column(&self, name: &str) -> Option<&TableColumn> {
        let name = name.to_uppercase();
        if !self.columns.iter().any(|c| c.name.trim().to_uppercase() == name) {
            return None;
        }
        self.columns
            .iter()
            .find(|c| c.name.to_uppercase().contains(&name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ColumnFormat {
    repeat: usize,
    code: char,
}

impl ColumnFormat {
    fn parse(tform: &str) -> Option<Self> {
        let tform = tform.trim();
        let digits: String = tform.chars().take_while(|c| c.is_ascii_digit()).collect();
        let code = tform[digits.len()..].chars().next()?;
        let repeat = if digits.is_empty() {
            1
        } else {
            digits.parse().ok()?
        };
        Some(Self { repeat, code })
    }

    fn element_bytes(&self) -> Option<usize> {
        Some(match self.code {
            'L' | 'B' | 'A' => 1,
            'I' => 2,
            'J' | 'E' => 4,
            'K' | 'D' | 'C' | 'P' => 8,
            'M' | 'Q' => 16,
            _ => return None,
        })
    }

    fn byte_width(&self) -> Option<usize> {
        if self.code == 'X' {
            return Some(self.repeat.div_ceil(8));
        }
        Some(self.repeat * self.element_bytes()?)
    }

    fn is_numeric(&self) -> bool {
        matches!(self.code, 'B' | 'I' | 'J' | 'K' | 'E' | 'D')
    }

    fn read_element(&self, mut bytes: &[u8]) -> Result<f64> {
        Ok(match self.code {
            'B' => bytes.read_u8()? as f64,
            'I' => bytes.read_i16::<BigEndian>()? as f64,
            'J' => bytes.read_i32::<BigEndian>()? as f64,
            'K' => bytes.read_i64::<BigEndian>()? as f64,
            'E' => bytes.read_f32::<BigEndian>()? as f64,
            'D' => bytes.read_f64::<BigEndian>()?,
            other => anyhow::bail!("Unsupported column type {}", other),
        })
    }
}

/// Read the numeric columns of a BINTABLE HDU. Non-numeric columns are
/// skipped; TSCAL/TZERO are applied.
pub fn read_bintable(path: &Path, hdu: &HduInfo) -> Result<BinTable> {
    if hdu.kind != HduKind::BinTable {
        anyhow::bail!("HDU {} is not a binary table", hdu.index);
    }
    let header = &hdu.header;
    let row_bytes = header.get_usize("NAXIS1").unwrap_or(0);
    let n_rows = header.get_usize("NAXIS2").unwrap_or(0);
    let n_fields = header.get_usize("TFIELDS").unwrap_or(0);

    struct Field {
        name: String,
        format: Option<ColumnFormat>,
        offset: usize,
        scale: f64,
        zero: f64,
    }

    let mut fields = Vec::with_capacity(n_fields);
    let mut offset = 0usize;
    for i in 1..=n_fields {
        let tform = header.get(&format!("TFORM{}", i)).unwrap_or("");
        let format = ColumnFormat::parse(tform);
        let width = format
            .and_then(|f| f.byte_width())
            .with_context(|| format!("Unsupported TFORM{} '{}'", i, tform))?;
        fields.push(Field {
            name: header
                .get(&format!("TTYPE{}", i))
                .unwrap_or("")
                .trim()
                .to_string(),
            format,
            offset,
            scale: header.get_f64(&format!("TSCAL{}", i)).unwrap_or(1.0),
            zero: header.get_f64(&format!("TZERO{}", i)).unwrap_or(0.0),
        });
        offset += width;
    }
    if offset > row_bytes {
        anyhow::bail!(
            "Column widths ({} bytes) exceed row size ({} bytes)",
            offset,
            row_bytes
        );
    }

    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    reader.seek(SeekFrom::Start(hdu.data_start))?;
    let mut raw = vec![0u8; row_bytes * n_rows];
    reader
        .read_exact(&mut raw)
        .context("Binary table data is truncated")?;

    let mut columns: Vec<TableColumn> = Vec::new();
    for field in &fields {
        let format = match field.format {
            Some(f) if f.is_numeric() => f,
            _ => continue,
        };
        let Some(element) = format.element_bytes() else {
            continue;
        };
        let mut values = Vec::with_capacity(n_rows * format.repeat);
        for row in raw.chunks_exact(row_bytes.max(1)).take(n_rows) {
            for r in 0..format.repeat {
                let start = field.offset + r * element;
                let v = format.read_element(&row[start..start + element])?;
                values.push(v * field.scale + field.zero);
            }
        }
        columns.push(TableColumn {
            name: field.name.clone(),
            values,
        });
    }

    Ok(BinTable { columns })
}

/// Header value for cards written by [`write_image`]
#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Int(i64),
    Float(f64),
    Text(String),
    Logical(bool),
}

fn format_card(keyword: &str, value: &CardValue) -> String {
    let value = match value {
        CardValue::Int(v) => format!("{:>20}", v),
        CardValue::Float(v) => format!("{:>20}", format!("{:.10E}", v)),
        CardValue::Logical(v) => format!("{:>20}", if *v { "T" } else { "F" }),
        CardValue::Text(s) => format!("'{:<8}'", s.replace('\'', "''")),
    };
    let mut card = format!("{:<8}= {}", keyword, value);
    card.truncate(CARD_SIZE);
    format!("{:<80}", card)
}

/// Write a single-HDU FITS file holding a 32-bit float image
pub fn write_image(
    path: &Path,
    width: usize,
    height: usize,
    data: &[f32],
    cards: &[(&str, CardValue)],
) -> Result<()> {
    if data.len() != width * height {
        anyhow::bail!(
            "Data size mismatch: expected {} pixels, got {}",
            width * height,
            data.len()
        );
    }

    let mut header = String::new();
    header.push_str(&format_card("SIMPLE", &CardValue::Logical(true)));
    header.push_str(&format_card("BITPIX", &CardValue::Int(-32)));
    header.push_str(&format_card("NAXIS", &CardValue::Int(2)));
    header.push_str(&format_card("NAXIS1", &CardValue::Int(width as i64)));
    header.push_str(&format_card("NAXIS2", &CardValue::Int(height as i64)));
    for (keyword, value) in cards {
        header.push_str(&format_card(keyword, value));
    }
    header.push_str(&format!("{:<80}", "END"));
    while header.len() % BLOCK_SIZE != 0 {
        header.push(' ');
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create FITS file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(header.as_bytes())?;
    for &v in data {
        writer.write_f32::<BigEndian>(v)?;
    }
    let written = data.len() * 4;
    let padding = (padded(written as u64) as usize) - written;
    writer.write_all(&vec![0u8; padding])?;
    writer.flush()?;
    Ok(())
}
