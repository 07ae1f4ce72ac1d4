//! Document-level coordination.
//!
//! ```text
//! RawDocument ─► ImageNormalizer ─► PageStream ─┬─► page worker ─► segment ─► regions ─┬─► OcrInvoker
//!                                               └─► page worker ─► ...                 └─► OcrInvoker
//!                                  TextAssembler ◄─ OcrResults (any order)
//!                                  DocumentAggregator ◄─ PageTexts (keyed by index)
//! ```
//!
//! Page rasterization is serialized behind the stream lock; segmentation and
//! recognition run in parallel, bounded by `max_page_workers` and
//! `max_region_workers`. Engine calls are further bounded by the pool size.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tracing::{info, warn};

use super::aggregator::DocumentAggregator;
use super::assembler::TextAssembler;
use super::cancel::CancellationToken;
use super::engine_pool::EnginePool;
use super::invoker::OcrInvoker;
use super::normalizer::{ImageNormalizer, PageStream};
use super::segmenter::PageSegmenter;
use super::types::{DocumentKind, DocumentResult, OcrEngine, OcrResult, PageImage, PageText, RawDocument, Region};
use super::{PageError, PipelineError};
use crate::config::{validate_language, PipelineConfig};

type PageOutcome = (usize, Result<PageText, PipelineError>);

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    normalizer: ImageNormalizer,
    segmenter: PageSegmenter,
    invoker: OcrInvoker,
    assembler: TextAssembler,
    aggregator: DocumentAggregator,
}

impl PipelineOrchestrator {
    /// Validate `config` and pool `engines` for recognition.
    pub fn new(config: PipelineConfig, engines: Vec<Box<dyn OcrEngine>>) -> Result<Self, PipelineError> {
        let pool = EnginePool::new(engines)?;
        Self::with_pool(config, Arc::new(pool))
    }

    /// Share an existing engine pool between orchestrators.
    pub fn with_pool(config: PipelineConfig, pool: Arc<EnginePool>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            normalizer: ImageNormalizer::from_config(&config),
            segmenter: PageSegmenter::new(config.segmentation.clone()),
            invoker: OcrInvoker::new(pool, config.crop_padding),
            assembler: TextAssembler::from_config(&config),
            aggregator: DocumentAggregator::new(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine_pool(&self) -> &EnginePool {
        self.invoker.pool()
    }

    pub fn process(&self, document: RawDocument, language: &str) -> Result<DocumentResult, PipelineError> {
        self.process_with_cancel(document, language, &CancellationToken::new())
    }

    /// Run the whole pipeline on one document.
    ///
    /// Page-level failures end up in the result; only whole-document failures
    /// are returned as errors. Once `cancel` fires, no new page or region
    /// starts and the call returns `Cancelled`.
    pub fn process_with_cancel(
        &self,
        document: RawDocument,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<DocumentResult, PipelineError> {
        validate_language(language)?;
        cancel.check()?;
        self.invoker.pool().ensure_language(language, cancel)?;

        let stream = self.normalizer.normalize(document)?;
        let source = Arc::clone(stream.source());
        let page_count = stream.page_count();

        info!(
            document_id = %source.id,
            pages = page_count,
            language,
            page_workers = self.config.max_page_workers.min(page_count),
            "Starting document OCR"
        );

        // Fatal errors in one worker stop the others without touching the caller's token
        let run = cancel.child();
        let outcomes = self.run_pages(stream, source.kind, language, &run);

        if cancel.is_cancelled() {
            info!(document_id = %source.id, "Document OCR cancelled");
            return Err(PipelineError::Cancelled);
        }

        let mut pages = Vec::with_capacity(outcomes.len());
        let mut cancelled = false;
        for (index, outcome) in outcomes {
            match outcome {
                Ok(page) => pages.push(page),
                Err(PipelineError::Cancelled) => cancelled = true,
                Err(e) => {
                    warn!(document_id = %source.id, page = index, error = %e, "Document OCR aborted");
                    return Err(e);
                }
            }
        }
        if cancelled {
            return Err(PipelineError::Cancelled);
        }

        self.aggregator.aggregate(pages, &source, page_count, language)
    }

    /// Run `process_with_cancel` on the blocking thread pool.
    pub async fn process_async(
        self: Arc<Self>,
        document: RawDocument,
        language: String,
        cancel: CancellationToken,
    ) -> Result<DocumentResult, PipelineError> {
        tokio::task::spawn_blocking(move || self.process_with_cancel(document, &language, &cancel))
            .await
            .map_err(|e| PipelineError::Worker(format!("OCR task failed: {e}")))?
    }

    // ── Pages ──

    fn run_pages(
        &self,
        stream: PageStream,
        kind: DocumentKind,
        language: &str,
        run: &CancellationToken,
    ) -> Vec<PageOutcome> {
        let workers = self.config.max_page_workers.min(stream.page_count()).max(1);
        let stream = Mutex::new(stream);
        let stream = &stream;
        let (tx, rx) = mpsc::channel::<PageOutcome>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                scope.spawn(move || {
                    while !run.is_cancelled() {
                        let next = match stream.lock() {
                            Ok(mut pages) => catch_unwind(AssertUnwindSafe(|| pages.next_indexed())),
                            Err(_) => Ok(None),
                        };
                        let (index, page) = match next {
                            Ok(Some(entry)) => entry,
                            Ok(None) => break,
                            Err(_) => {
                                run.cancel();
                                let _ = tx.send((usize::MAX, Err(PipelineError::Worker("page decoder panicked".into()))));
                                break;
                            }
                        };

                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            self.process_page(index, page, kind, language, run)
                        }))
                        .unwrap_or_else(|_| Err(PipelineError::Worker(format!("page {index} worker panicked"))));

                        let fatal = outcome.is_err();
                        if fatal {
                            run.cancel();
                        }
                        if tx.send((index, outcome)).is_err() || fatal {
                            break;
                        }
                    }
                });
            }
            drop(tx);
            rx.iter().collect()
        })
    }

    fn process_page(
        &self,
        index: usize,
        page: Result<PageImage, PageError>,
        kind: DocumentKind,
        language: &str,
        run: &CancellationToken,
    ) -> Result<PageText, PipelineError> {
        let page = match page {
            Ok(page) => page,
            // A single image has nothing to fall back on
            Err(e) if kind == DocumentKind::Image => return Err(PipelineError::Decode(e.to_string())),
            Err(e) => {
                warn!(page = index, error = %e, "Page could not be rasterized");
                return Ok(PageText::failed(index, e.to_string()));
            }
        };

        run.check()?;
        let regions = self.segmenter.segment(&page);
        let results = self.recognize_regions(&regions, &page, language, run)?;
        Ok(self
            .assembler
            .assemble_with_warnings(page.index, results, page.warnings.clone()))
    }

    // ── Regions ──

    fn recognize_regions(
        &self,
        regions: &[Region],
        page: &PageImage,
        language: &str,
        run: &CancellationToken,
    ) -> Result<Vec<OcrResult>, PipelineError> {
        if regions.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.config.max_region_workers.min(regions.len());
        let cursor = AtomicUsize::new(0);
        let cursor = &cursor;
        let (tx, rx) = mpsc::channel::<Result<OcrResult, PipelineError>>();

        let outcomes: Vec<_> = thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                scope.spawn(move || loop {
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    if i >= regions.len() || run.is_cancelled() {
                        break;
                    }
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        self.invoker.recognize(&regions[i], page, language, run)
                    }))
                    .unwrap_or_else(|_| {
                        Err(PipelineError::Worker(format!(
                            "region {} on page {} panicked",
                            regions[i].key.seq, page.index
                        )))
                    });

                    let fatal = outcome.is_err();
                    if fatal {
                        run.cancel();
                    }
                    if tx.send(outcome).is_err() || fatal {
                        break;
                    }
                });
            }
            drop(tx);
            rx.iter().collect()
        });

        let mut results = Vec::with_capacity(regions.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(PipelineError::Cancelled) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        run.check()?;
        if results.len() != regions.len() {
            return Err(PipelineError::Worker(format!(
                "page {}: {} of {} regions recognized",
                page.index,
                results.len(),
                regions.len()
            )));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentationConfig;
    use crate::pipeline::ocr::MockOcrEngine;
    use crate::pipeline::test_support::{build_scanned_pdf, draw_box, make_png, white_page, PdfPage, ScriptedEngine};
    use crate::pipeline::types::{ConfidenceScale, DocumentStatus, PageStatus, PageWarning, RawRecognition, RegionKind, RegionOutcome, PAGE_BREAK};
    use crate::pipeline::EngineError;
    use image::GrayImage;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_page_workers: 2,
            max_region_workers: 4,
            engine_pool_size: 2,
            ..PipelineConfig::default()
        }
    }

    fn reader() -> ScriptedEngine {
        ScriptedEngine::new()
            .word(120, "HELLO", 0.9)
            .word(100, "WORLD", 0.9)
    }

    fn orchestrator(engine: &ScriptedEngine) -> PipelineOrchestrator {
        PipelineOrchestrator::new(config(), engine.boxed_pool(2)).unwrap()
    }

    /// Two lines far enough apart to land in separate blocks.
    fn hello_world() -> GrayImage {
        let mut page = white_page(400, 200);
        draw_box(&mut page, 20, 30, 120, 20);
        draw_box(&mut page, 20, 90, 100, 20);
        page
    }

    fn single_word(width: u32) -> GrayImage {
        let mut page = white_page(400, 200);
        draw_box(&mut page, 20, 30, width, 20);
        page
    }

    fn png_doc(page: &GrayImage) -> RawDocument {
        RawDocument::new(make_png(page), "image/png").with_filename("scan.png")
    }

    fn pdf_doc(pages: &[PdfPage]) -> RawDocument {
        RawDocument::new(build_scanned_pdf(pages), "application/pdf")
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = PipelineConfig {
            max_page_workers: 0,
            ..config()
        };
        assert!(matches!(
            PipelineOrchestrator::new(bad, reader().boxed_pool(1)),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn empty_engine_list_is_unavailable() {
        assert!(matches!(
            PipelineOrchestrator::new(config(), Vec::new()),
            Err(PipelineError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn two_lines_read_in_order() {
        let result = orchestrator(&reader())
            .process(png_doc(&hello_world()), "eng")
            .unwrap();

        assert_eq!(result.status, DocumentStatus::Complete);
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].text, "HELLO\nWORLD");
        assert_eq!(result.pages[0].results.len(), 2);
        assert_eq!(result.metadata.total_page_count, 1);
        assert_eq!(result.metadata.filename.as_deref(), Some("scan.png"));
        assert_eq!(result.metadata.language, "eng");
        assert!((result.metadata.mean_confidence - 0.9).abs() < 1e-5);
        assert_eq!(result.full_text(), "HELLO\nWORLD");
    }

    #[test]
    fn same_line_segments_keep_reading_order_despite_completion_order() {
        // First segment is slowest, so results arrive out of order
        let engine = ScriptedEngine::new()
            .slow_word(40, "A", 0.9, Duration::from_millis(80))
            .word(60, "B", 0.9)
            .slow_word(80, "C", 0.9, Duration::from_millis(40));
        let mut page = white_page(400, 100);
        draw_box(&mut page, 20, 30, 40, 20);
        draw_box(&mut page, 120, 30, 60, 20);
        draw_box(&mut page, 240, 30, 80, 20);

        let orchestrator = PipelineOrchestrator::new(config(), engine.boxed_pool(3)).unwrap();
        let result = orchestrator.process(png_doc(&page), "eng").unwrap();
        assert_eq!(result.pages[0].text, "A B C");
    }

    #[test]
    fn pdf_with_blank_middle_page_is_complete() {
        let doc = pdf_doc(&[
            PdfPage::Gray(single_word(120)),
            PdfPage::Gray(white_page(400, 200)),
            PdfPage::Gray(single_word(100)),
        ]);
        let result = orchestrator(&reader()).process(doc, "eng").unwrap();

        assert_eq!(result.status, DocumentStatus::Complete);
        let indices: Vec<usize> = result.pages.iter().map(|p| p.page_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(result.pages[1].status, PageStatus::Blank);
        assert!(result.pages[1].text.is_empty());
        assert_eq!(
            result.full_text(),
            format!("HELLO{PAGE_BREAK}{PAGE_BREAK}WORLD")
        );
        assert!((result.metadata.mean_confidence - 0.6).abs() < 1e-5);
    }

    #[test]
    fn pdf_page_split_into_strips_reads_every_strip() {
        let mut top = white_page(400, 100);
        draw_box(&mut top, 20, 30, 120, 20);
        let mut bottom = white_page(400, 100);
        draw_box(&mut bottom, 20, 30, 100, 20);

        let result = orchestrator(&reader())
            .process(pdf_doc(&[PdfPage::Strips(vec![top, bottom])]), "eng")
            .unwrap();

        assert_eq!(result.status, DocumentStatus::Complete);
        assert_eq!(result.pages[0].text, "HELLO\nWORLD");
        assert!(!result.pages[0]
            .warnings
            .iter()
            .any(|w| matches!(w, PageWarning::ImagesDropped { .. })));
    }

    #[test]
    fn unrenderable_pdf_page_fails_alone() {
        let doc = pdf_doc(&[
            PdfPage::Gray(single_word(120)),
            PdfPage::TextOnly,
            PdfPage::Gray(single_word(100)),
        ]);
        let result = orchestrator(&reader()).process(doc, "eng").unwrap();

        assert_eq!(result.status, DocumentStatus::PartiallyFailed);
        assert_eq!(result.pages.len(), 3);
        assert!(result.pages[1].is_failed());
        assert_eq!(result.pages[0].text, "HELLO");
        assert_eq!(result.pages[2].text, "WORLD");
        assert_eq!(result.unreadable_pages(), vec![1]);
    }

    #[test]
    fn every_page_failing_is_failed_status() {
        let doc = pdf_doc(&[PdfPage::TextOnly, PdfPage::TextOnly]);
        let result = orchestrator(&reader()).process(doc, "eng").unwrap();
        assert_eq!(result.status, DocumentStatus::Failed);
        assert_eq!(result.pages.len(), 2);
    }

    #[test]
    fn garbage_bytes_are_decode_error() {
        let doc = RawDocument::new(vec![0x13; 500], "image/png");
        assert!(matches!(
            orchestrator(&reader()).process(doc, "eng"),
            Err(PipelineError::Decode(_))
        ));
    }

    #[test]
    fn truncated_image_is_decode_error() {
        let mut bytes = make_png(&hello_world());
        bytes.truncate(100);
        let doc = RawDocument::new(bytes, "image/png");
        assert!(matches!(
            orchestrator(&reader()).process(doc, "eng"),
            Err(PipelineError::Decode(_))
        ));
    }

    #[test]
    fn unsupported_mime_is_rejected() {
        let doc = RawDocument::new(make_png(&hello_world()), "text/html");
        assert!(matches!(
            orchestrator(&reader()).process(doc, "eng"),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn invalid_language_is_config_error() {
        assert!(matches!(
            orchestrator(&reader()).process(png_doc(&hello_world()), "../eng"),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn missing_engine_fails_before_any_work() {
        let engine = reader().unavailable();
        let calls = engine.calls();
        let orchestrator = orchestrator(&engine);
        assert!(matches!(
            orchestrator.process(png_doc(&hello_world()), "eng"),
            Err(PipelineError::EngineUnavailable(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Passes the language check, then loses its runtime on first use.
    struct Vanishing;

    impl OcrEngine for Vanishing {
        fn name(&self) -> &str {
            "vanishing"
        }

        fn recognize(&self, _png: &[u8], _language: &str) -> Result<RawRecognition, EngineError> {
            Err(EngineError::Unavailable("runtime gone".into()))
        }
    }

    #[test]
    fn engine_lost_mid_document_aborts() {
        let engines: Vec<Box<dyn OcrEngine>> = vec![Box::new(Vanishing)];
        let orchestrator = PipelineOrchestrator::new(config(), engines).unwrap();
        assert!(matches!(
            orchestrator.process(png_doc(&hello_world()), "eng"),
            Err(PipelineError::EngineUnavailable(_))
        ));
        assert_eq!(orchestrator.engine_pool().available(), 1);
    }

    #[test]
    fn broken_region_is_degraded_not_fatal() {
        let engine = reader().broken_word(60);
        let mut page = hello_world();
        draw_box(&mut page, 20, 150, 60, 20);

        let result = orchestrator(&engine).process(png_doc(&page), "eng").unwrap();
        let text = &result.pages[0];
        assert_eq!(text.text, "HELLO\nWORLD");
        assert_eq!(text.degraded_regions, vec![2]);
        assert!(matches!(
            text.results[2].outcome,
            RegionOutcome::Degraded { attempts: 2, .. }
        ));
        assert_eq!(text.status, PageStatus::Recognized);
        assert_eq!(result.status, DocumentStatus::Complete);
    }

    #[test]
    fn only_broken_regions_make_page_unreadable() {
        let engine = ScriptedEngine::new().broken_word(120);
        let result = orchestrator(&engine)
            .process(png_doc(&single_word(120)), "eng")
            .unwrap();
        assert_eq!(result.pages[0].status, PageStatus::Unreadable);
        assert_eq!(result.status, DocumentStatus::PartiallyFailed);
        assert_eq!(result.unreadable_pages(), vec![0]);
    }

    #[test]
    fn flaky_region_recovers_on_retry() {
        let engine = ScriptedEngine::new().flaky_word(120, "HELLO", 0.8, 1);
        let result = orchestrator(&engine)
            .process(png_doc(&single_word(120)), "eng")
            .unwrap();
        assert_eq!(result.pages[0].text, "HELLO");
        assert_eq!(
            result.pages[0].results[0].outcome,
            RegionOutcome::Recognized { attempts: 2 }
        );
    }

    #[test]
    fn low_confidence_text_is_kept_and_flagged() {
        let engine = ScriptedEngine::new().word(120, "H3LL0", 0.2);
        let result = orchestrator(&engine)
            .process(png_doc(&single_word(120)), "eng")
            .unwrap();
        let page = &result.pages[0];
        assert_eq!(page.text, "[?H3LL0?]");
        assert_eq!(page.low_confidence_regions, vec![0]);
        assert_eq!(page.status, PageStatus::Recognized);
    }

    #[test]
    fn identical_input_gives_identical_result() {
        let doc = || {
            pdf_doc(&[
                PdfPage::Gray(hello_world()),
                PdfPage::Gray(single_word(100)),
                PdfPage::Gray(single_word(120)),
            ])
        };
        let orchestrator = orchestrator(&reader());
        let first = orchestrator.process(doc(), "eng").unwrap();
        let second = orchestrator.process(doc(), "eng").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.metadata.document_id, second.metadata.document_id);
    }

    #[test]
    fn confidences_stay_in_unit_range() {
        let engine = reader().percent_scale();
        let result = orchestrator(&engine)
            .process(png_doc(&hello_world()), "eng")
            .unwrap();
        assert!((0.0..=1.0).contains(&result.metadata.mean_confidence));
        for page in &result.pages {
            assert!((0.0..=1.0).contains(&page.mean_confidence));
            for r in &page.results {
                assert!((0.0..=1.0).contains(&r.confidence));
            }
        }
    }

    #[test]
    fn block_granularity_reads_whole_blocks() {
        let cfg = PipelineConfig {
            segmentation: SegmentationConfig {
                granularity: RegionKind::Block,
                ..SegmentationConfig::default()
            },
            ..config()
        };
        let engines: Vec<Box<dyn OcrEngine>> = vec![Box::new(MockOcrEngine::new("Total\n9.99", 0.8))];
        let orchestrator = PipelineOrchestrator::new(cfg, engines).unwrap();
        let result = orchestrator.process(png_doc(&single_word(120)), "eng").unwrap();
        assert_eq!(result.pages[0].text, "Total\n9.99");
    }

    #[test]
    fn engines_are_all_returned_after_processing() {
        let orchestrator = orchestrator(&reader());
        orchestrator.process(png_doc(&hello_world()), "eng").unwrap();
        assert_eq!(orchestrator.engine_pool().available(), 2);
    }

    #[test]
    fn cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let engine = reader();
        let calls = engine.calls();
        assert!(matches!(
            orchestrator(&engine).process_with_cancel(png_doc(&hello_world()), "eng", &token),
            Err(PipelineError::Cancelled)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_while_running() {
        // Sixteen slow regions on two engines take far longer than the cancel delay
        let mut page = white_page(400, 700);
        for row in 0..16 {
            draw_box(&mut page, 20, 20 + row * 40, 120, 20);
        }
        let engine = ScriptedEngine::new()
            .word(120, "ROW", 0.9)
            .with_delay(Duration::from_millis(50));
        let calls = engine.calls();
        let orchestrator = orchestrator(&engine);

        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let result = orchestrator.process_with_cancel(png_doc(&page), "eng", &token);
        canceller.join().unwrap();

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(calls.load(Ordering::SeqCst) < 16);
        assert_eq!(orchestrator.engine_pool().available(), 2);
    }

    #[test]
    fn engine_calls_never_exceed_pool_size() {
        struct Gauge {
            active: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        impl OcrEngine for Gauge {
            fn name(&self) -> &str {
                "gauge"
            }

            fn recognize(&self, _png: &[u8], _language: &str) -> Result<RawRecognition, EngineError> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(RawRecognition {
                    text: "x".into(),
                    confidence: 0.9,
                    scale: ConfidenceScale::Unit,
                })
            }
        }

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let engines: Vec<Box<dyn OcrEngine>> = (0..2)
            .map(|_| {
                Box::new(Gauge {
                    active: Arc::clone(&active),
                    peak: Arc::clone(&peak),
                }) as Box<dyn OcrEngine>
            })
            .collect();

        let mut page = white_page(400, 400);
        for row in 0..8 {
            draw_box(&mut page, 20, 20 + row * 40, 120, 20);
        }
        let doc = pdf_doc(&[PdfPage::Gray(page.clone()), PdfPage::Gray(page)]);
        let orchestrator = PipelineOrchestrator::new(config(), engines).unwrap();
        let result = orchestrator.process(doc, "eng").unwrap();

        assert_eq!(result.pages[0].results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn async_processing_matches_sync() {
        let orchestrator = Arc::new(orchestrator(&reader()));
        let expected = orchestrator.process(png_doc(&hello_world()), "eng").unwrap();

        let result = Arc::clone(&orchestrator)
            .process_async(png_doc(&hello_world()), "eng".into(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, expected);
    }
}
