//! OCR engines.
//!
//! Every engine takes a PNG-encoded region and a language code and returns
//! text plus a confidence in its own units. `MockOcrEngine` is deterministic
//! and used by tests; `TesseractCli` runs the `tesseract` binary per region;
//! `BundledTesseract` (feature `ocr`) links libtesseract.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use super::types::{BoundingBox, ConfidenceScale, OcrEngine, RawRecognition, RegionKind};
use super::EngineError;

/// Per-region timeout for the tesseract process.
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(30);

const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Tesseract page segmentation mode for a region granularity.
/// 7 = single text line, 6 = single uniform block.
pub fn page_seg_mode(kind: RegionKind) -> u8 {
    match kind {
        RegionKind::Line => 7,
        RegionKind::Block => 6,
    }
}

// ═══════════════════════════════════════════════════════════
// Mock
// ═══════════════════════════════════════════════════════════

/// Deterministic engine: returns the same text for every region.
pub struct MockOcrEngine {
    pub text: String,
    pub confidence: f32,
    transient_failures: AtomicUsize,
    unavailable: bool,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            transient_failures: AtomicUsize::new(0),
            unavailable: false,
        }
    }

    /// Fail the first `n` calls with a transient error.
    pub fn failing_first(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Engine that can never run.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new("", 0.0)
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn recognize(&self, _image_png: &[u8], language: &str) -> Result<RawRecognition, EngineError> {
        self.ensure_language(language)?;

        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::Transient("mock engine crash".into()));
        }

        Ok(RawRecognition {
            text: self.text.clone(),
            confidence: self.confidence,
            scale: ConfidenceScale::Unit,
        })
    }

    fn ensure_language(&self, language: &str) -> Result<(), EngineError> {
        if self.unavailable {
            return Err(EngineError::Unavailable(format!(
                "mock engine cannot load '{language}'"
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Tesseract CLI
// ═══════════════════════════════════════════════════════════

/// Runs the `tesseract` binary once per region, PNG on stdin, TSV on stdout.
///
/// A crash, non-zero exit or timeout is transient; a missing binary or
/// missing language data makes the engine unavailable.
pub struct TesseractCli {
    program: PathBuf,
    psm: u8,
    timeout: Duration,
    languages: OnceLock<Result<Vec<String>, EngineError>>,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new()
    }
}

impl TesseractCli {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("tesseract"),
            psm: page_seg_mode(RegionKind::Line),
            timeout: DEFAULT_ENGINE_TIMEOUT,
            languages: OnceLock::new(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Languages reported by `tesseract --list-langs`, queried once.
    pub fn available_languages(&self) -> Result<&[String], EngineError> {
        self.languages
            .get_or_init(|| list_languages(&self.program))
            .as_ref()
            .map(Vec::as_slice)
            .map_err(Clone::clone)
    }

    fn run(&self, args: &[&str], input: &[u8]) -> Result<std::process::Output, EngineError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&self.program, e))?;

        let started = Instant::now();
        let stdin_writer = child.stdin.take().map(|stdin| spawn_pipe_writer(stdin, input.to_vec()));
        let stdout_reader = child.stdout.take().map(spawn_pipe_reader);
        let stderr_reader = child.stderr.take().map(spawn_pipe_reader);

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    // Killing the child closes its stdin, which unblocks the writer.
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(
                        timeout_ms = self.timeout.as_millis() as u64,
                        input_bytes = input.len(),
                        "tesseract timed out, process killed"
                    );
                    return Err(EngineError::Transient(format!(
                        "tesseract timed out after {:?}",
                        self.timeout
                    )));
                }
                Ok(None) => std::thread::sleep(PROCESS_POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(EngineError::Transient(format!("Failed to wait for tesseract: {e}")));
                }
            }
        };

        if let Some(Err(e)) = stdin_writer.and_then(|h| h.join().ok()) {
            // The process may exit without reading everything; its status decides.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(EngineError::Transient(format!("Failed to write image: {e}")));
            }
        }

        Ok(std::process::Output {
            status,
            stdout: join_pipe_reader(stdout_reader),
            stderr: join_pipe_reader(stderr_reader),
        })
    }
}

impl OcrEngine for TesseractCli {
    fn name(&self) -> &str {
        "tesseract-cli"
    }

    fn recognize(&self, image_png: &[u8], language: &str) -> Result<RawRecognition, EngineError> {
        let psm = self.psm.to_string();
        let output = self.run(
            &["stdin", "stdout", "-l", language, "--psm", &psm, "tsv"],
            image_png,
        )?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Transient(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(recognition_from_tsv(&tsv))
    }

    fn ensure_language(&self, language: &str) -> Result<(), EngineError> {
        let available = self.available_languages()?;
        check_languages(language, |code| available.iter().any(|l| l == code))
    }
}

fn spawn_error(program: &Path, e: std::io::Error) -> EngineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        EngineError::Unavailable(format!("{} not found on PATH", program.display()))
    } else {
        EngineError::Transient(format!("Failed to start {}: {e}", program.display()))
    }
}

fn spawn_pipe_writer<W: Write + Send + 'static>(
    mut pipe: W,
    input: Vec<u8>,
) -> std::thread::JoinHandle<std::io::Result<()>> {
    std::thread::spawn(move || {
        pipe.write_all(&input)?;
        pipe.flush()
    })
}

fn spawn_pipe_reader<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_pipe_reader(reader: Option<std::thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn list_languages(program: &Path) -> Result<Vec<String>, EngineError> {
    let output = Command::new(program)
        .arg("--list-langs")
        .output()
        .map_err(|e| spawn_error(program, e))?;

    if !output.status.success() {
        return Err(EngineError::Unavailable(format!(
            "{} --list-langs failed: {}",
            program.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    // Older releases print the list on stderr.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push('\n');
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    let languages = parse_language_list(&text);
    tracing::debug!(count = languages.len(), "tesseract languages listed");
    Ok(languages)
}

/// Parse `tesseract --list-langs` output into language codes.
pub fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of") && !l.contains(' '))
        .map(str::to_string)
        .collect()
}

/// Every `+`-separated part of `language` must satisfy `has`.
fn check_languages(language: &str, has: impl Fn(&str) -> bool) -> Result<(), EngineError> {
    match language.split('+').find(|code| !has(code)) {
        Some(missing) => Err(EngineError::Unavailable(format!(
            "Language data for '{missing}' is not installed"
        ))),
        None => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════
// Bundled Tesseract
// ═══════════════════════════════════════════════════════════

/// libtesseract linked in-process (feature `ocr`).
///
/// A fresh `Tesseract` handle is built per call, since the handle is consumed
/// by each builder step.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: PathBuf,
    psm: u8,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    /// Initialize with a tessdata directory containing at least `eng.traineddata`.
    pub fn new(tessdata_dir: &Path) -> Result<Self, EngineError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(EngineError::Unavailable(format!(
                "Tesseract data not found in {}",
                tessdata_dir.display()
            )));
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            psm: page_seg_mode(RegionKind::Line),
        })
    }

    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image_png: &[u8], language: &str) -> Result<RawRecognition, EngineError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| EngineError::Unavailable("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(language))
            .map_err(|e| EngineError::Unavailable(format!("{e:?}")))?
            .set_variable("tessedit_pageseg_mode", &self.psm.to_string())
            .map_err(|e| EngineError::Transient(format!("{e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(image_png)
            .map_err(|e| EngineError::Transient(format!("{e:?}")))?;

        match tess.get_tsv_text(0) {
            Ok(tsv) => Ok(recognition_from_tsv(&tsv)),
            Err(_) => {
                // Fallback: plain text with the page-mean confidence
                let text = tess
                    .get_text()
                    .map_err(|e| EngineError::Transient(format!("{e:?}")))?;
                Ok(RawRecognition {
                    text,
                    confidence: tess.mean_text_conf() as f32,
                    scale: ConfidenceScale::Percent,
                })
            }
        }
    }

    fn ensure_language(&self, language: &str) -> Result<(), EngineError> {
        check_languages(language, |code| {
            self.tessdata_dir
                .join(format!("{code}.traineddata"))
                .exists()
        })
    }
}

/// `TESSDATA_PREFIX` if it holds `eng.traineddata`, else the first
/// well-known install location that does.
pub fn find_tessdata_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TESSDATA_PREFIX") {
        let p = PathBuf::from(&path);
        if p.join("eng.traineddata").exists() {
            return Some(p);
        }
    }

    let candidates = [
        "/usr/share/tesseract-ocr/5/tessdata",
        "/usr/share/tesseract-ocr/4.00/tessdata",
        "/usr/share/tessdata",
        "/usr/local/share/tessdata",
        "/opt/homebrew/share/tessdata",
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.join("eng.traineddata").exists())
}

/// Engines for a pool of `count`, respecting feature flags.
///
/// With the `ocr` feature and installed tessdata the bundled library is used;
/// otherwise the `tesseract` binary on PATH.
pub fn build_engines(count: usize, kind: RegionKind) -> Vec<Box<dyn OcrEngine>> {
    let psm = page_seg_mode(kind);

    #[cfg(feature = "ocr")]
    {
        if let Some(tessdata) = find_tessdata_dir() {
            let engines: Result<Vec<Box<dyn OcrEngine>>, EngineError> = (0..count)
                .map(|_| {
                    BundledTesseract::new(&tessdata)
                        .map(|e| Box::new(e.with_psm(psm)) as Box<dyn OcrEngine>)
                })
                .collect();
            match engines {
                Ok(engines) => {
                    tracing::info!(tessdata = %tessdata.display(), "Tesseract OCR initialized");
                    return engines;
                }
                Err(e) => tracing::warn!(error = %e, "Bundled Tesseract unusable, falling back to CLI"),
            }
        } else {
            tracing::warn!("Tesseract data not found, falling back to CLI");
        }
    }

    (0..count)
        .map(|_| Box::new(TesseractCli::new().with_psm(psm)) as Box<dyn OcrEngine>)
        .collect()
}

// ═══════════════════════════════════════════════════════════
// TSV parsing
// ═══════════════════════════════════════════════════════════

/// One word row of tesseract TSV output.
#[derive(Debug, Clone, PartialEq)]
pub struct TsvWord {
    pub text: String,
    /// 0-100; tesseract's -1 is reported as 0.
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// Word rows of `tesseract ... tsv` output, in emission order.
///
/// Columns are `level page block par line word left top width height conf
/// text`; only level 5 (word) rows with non-empty text are kept. Rows that do
/// not parse are dropped.
pub fn parse_tsv_words(tsv: &str) -> Vec<TsvWord> {
    tsv.lines().filter_map(parse_tsv_row).collect()
}

const TSV_COLUMNS: usize = 12;
const TSV_WORD_LEVEL: &str = "5";

fn parse_tsv_row(row: &str) -> Option<TsvWord> {
    let mut cols = row.splitn(TSV_COLUMNS, '\t');
    let mut next = || cols.next();

    if next()?.trim() != TSV_WORD_LEVEL {
        return None;
    }
    let _page = next()?;
    let block = next()?.parse().unwrap_or(0);
    let paragraph = next()?.parse().unwrap_or(0);
    let line = next()?.parse().unwrap_or(0);
    let _word = next()?;
    let geometry = [next()?, next()?, next()?, next()?];
    // tesseract 4+ reports fractional confidences, -1 for "none"
    let confidence: f32 = next()?.trim().parse().ok()?;
    let text = next()?.trim();
    if text.is_empty() {
        return None;
    }

    Some(TsvWord {
        text: text.to_string(),
        confidence: confidence.max(0.0),
        bounding_box: box_from_columns(geometry),
        block,
        paragraph,
        line,
    })
}

/// `None` unless all four geometry columns are integers.
fn box_from_columns([left, top, width, height]: [&str; 4]) -> Option<BoundingBox> {
    let n = |s: &str| s.trim().parse::<u32>().ok();
    Some(BoundingBox::new(n(left)?, n(top)?, n(width)?, n(height)?))
}

/// Rebuild text from TSV words (space within a line, newline between lines)
/// with the mean word confidence in percent.
pub fn recognition_from_tsv(tsv: &str) -> RawRecognition {
    let words = parse_tsv_words(tsv);
    if words.is_empty() {
        return RawRecognition {
            text: String::new(),
            confidence: 0.0,
            scale: ConfidenceScale::Percent,
        };
    }

    let mut text = String::new();
    let mut current_line = None;
    for word in &words {
        let line = (word.block, word.paragraph, word.line);
        match current_line {
            Some(prev) if prev == line => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        text.push_str(&word.text);
        current_line = Some(line);
    }

    let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
    RawRecognition {
        text,
        confidence,
        scale: ConfidenceScale::Percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn mock_returns_configured_text() {
        let engine = MockOcrEngine::new("TOTAL 12.50", 0.92);
        let result = engine.recognize(b"fake_png", "eng").unwrap();
        assert_eq!(result.text, "TOTAL 12.50");
        assert!((result.confidence - 0.92).abs() < f32::EPSILON);
        assert_eq!(result.scale, ConfidenceScale::Unit);
    }

    #[test]
    fn mock_fails_first_calls_then_recovers() {
        let engine = MockOcrEngine::new("ok", 0.9).failing_first(2);
        assert!(matches!(engine.recognize(b"x", "eng"), Err(EngineError::Transient(_))));
        assert!(matches!(engine.recognize(b"x", "eng"), Err(EngineError::Transient(_))));
        assert_eq!(engine.recognize(b"x", "eng").unwrap().text, "ok");
    }

    #[test]
    fn unavailable_mock_rejects_every_language() {
        let engine = MockOcrEngine::unavailable();
        assert!(matches!(engine.ensure_language("eng"), Err(EngineError::Unavailable(_))));
        assert!(matches!(engine.recognize(b"x", "eng"), Err(EngineError::Unavailable(_))));
    }

    #[test]
    fn psm_follows_granularity() {
        assert_eq!(page_seg_mode(RegionKind::Line), 7);
        assert_eq!(page_seg_mode(RegionKind::Block), 6);
    }

    // --- TSV parsing ---

    #[test]
    fn tsv_parser_extracts_words_and_boxes() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
             5\t1\t1\t1\t1\t1\t12\t18\t84\t26\t95\tSubtotal\n\
             5\t1\t1\t1\t1\t2\t100\t25\t60\t28\t88.5\t$18.40"
        );
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "Subtotal");
        assert!((words[0].confidence - 95.0).abs() < f32::EPSILON);
        assert_eq!(words[1].text, "$18.40");
        assert!((words[1].confidence - 88.5).abs() < f32::EPSILON);
        assert_eq!(words[1].bounding_box, Some(BoundingBox::new(100, 25, 60, 28)));
    }

    #[test]
    fn tsv_parser_skips_non_word_levels_and_malformed_rows() {
        let tsv = format!(
            "{HEADER}\n\
             2\t1\t1\t0\t0\t0\t10\t10\t580\t780\t-1\t\n\
             4\t1\t1\t1\t1\t0\t10\t20\t200\t30\t-1\t\n\
             too\tfew\tfields\n\
             notanumber\t1\t1\t1\t1\t1\t12\t18\t84\t26\t50\tbad\n\
             5\t1\t1\t1\t1\t1\t12\t18\t84\t26\t90\tOK\n\
             5\t1\t1\t1\t1\t2\t12\t18\t84\t26\t90\t"
        );
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "OK");
    }

    #[test]
    fn tsv_negative_confidence_is_zero() {
        let tsv = format!("{HEADER}\n5\t1\t1\t1\t1\t1\t12\t18\t84\t26\t-1\tgarbled");
        let words = parse_tsv_words(&tsv);
        assert_eq!(words[0].confidence, 0.0);
    }

    #[test]
    fn recognition_joins_lines_and_averages_confidence() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t12\t18\t84\t26\t90\tHELLO\n\
             5\t1\t1\t1\t1\t2\t104\t18\t84\t26\t80\tTHERE\n\
             5\t1\t1\t1\t2\t1\t12\t58\t84\t26\t70\tWORLD"
        );
        let raw = recognition_from_tsv(&tsv);
        assert_eq!(raw.text, "HELLO THERE\nWORLD");
        assert!((raw.confidence - 80.0).abs() < 1e-4);
        assert_eq!(raw.scale, ConfidenceScale::Percent);
    }

    #[test]
    fn empty_tsv_is_empty_recognition() {
        let raw = recognition_from_tsv(HEADER);
        assert!(raw.text.is_empty());
        assert_eq!(raw.confidence, 0.0);
        assert!(recognition_from_tsv("").text.is_empty());
    }

    // --- Tesseract CLI ---

    #[test]
    fn language_list_parsing() {
        let output = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\nfra\nosd\n";
        assert_eq!(parse_language_list(output), vec!["eng", "fra", "osd"]);
    }

    #[test]
    fn combined_languages_need_every_part() {
        let installed = ["eng", "fra"];
        let has = |code: &str| installed.contains(&code);
        assert!(check_languages("eng+fra", has).is_ok());
        assert!(matches!(
            check_languages("eng+deu", has),
            Err(EngineError::Unavailable(msg)) if msg.contains("deu")
        ));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = TesseractCli::new().with_program("/nonexistent/tesseract-binary");
        assert!(matches!(engine.ensure_language("eng"), Err(EngineError::Unavailable(_))));
        assert!(matches!(
            engine.recognize(b"png", "eng"),
            Err(EngineError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    fn fake_tesseract(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("tesseract");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn cli_reads_tsv_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "cat > /dev/null\nprintf '{}\\n5\\t1\\t1\\t1\\t1\\t1\\t0\\t0\\t10\\t10\\t91\\tTOTAL\\n'",
            HEADER.replace('\t', "\\t")
        );
        let program = fake_tesseract(dir.path(), &script);
        let engine = TesseractCli::new().with_program(program);

        let raw = engine.recognize(b"png bytes", "eng").unwrap();
        assert_eq!(raw.text, "TOTAL");
        assert!((raw.confidence - 91.0).abs() < f32::EPSILON);
    }

    #[cfg(unix)]
    #[test]
    fn cli_nonzero_exit_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_tesseract(dir.path(), "cat > /dev/null\necho boom >&2\nexit 3");
        let engine = TesseractCli::new().with_program(program);
        assert!(matches!(
            engine.recognize(b"png", "eng"),
            Err(EngineError::Transient(msg)) if msg.contains("boom")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn cli_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_tesseract(dir.path(), "exec sleep 5");
        let engine = TesseractCli::new()
            .with_program(program)
            .with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let result = engine.recognize(b"png", "eng");
        assert!(matches!(result, Err(EngineError::Transient(msg)) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn cli_timeout_fires_while_engine_ignores_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_tesseract(dir.path(), "exec sleep 3");
        let engine = TesseractCli::new()
            .with_program(program)
            .with_timeout(Duration::from_millis(200));
        let input = vec![0u8; 1 << 20];

        let started = Instant::now();
        let result = engine.recognize(&input, "eng");
        assert!(matches!(result, Err(EngineError::Transient(msg)) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn cli_language_check_uses_list_langs() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_tesseract(
            dir.path(),
            "echo 'List of available languages in \"/tessdata/\" (2):'\necho eng\necho fra",
        );
        let engine = TesseractCli::new().with_program(program);
        assert!(engine.ensure_language("eng+fra").is_ok());
        assert!(matches!(engine.ensure_language("jpn"), Err(EngineError::Unavailable(_))));
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn bundled_tesseract_rejects_missing_tessdata() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BundledTesseract::new(dir.path()),
            Err(EngineError::Unavailable(_))
        ));
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn bundled_tesseract_checks_traineddata_per_language() {
        let Some(tessdata_dir) = find_tessdata_dir() else {
            return;
        };
        let engine = BundledTesseract::new(&tessdata_dir).unwrap();
        assert!(engine.ensure_language("eng").is_ok());
        assert!(engine.ensure_language("zz_not_a_language").is_err());
    }
}
