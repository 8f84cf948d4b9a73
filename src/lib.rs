//! Element Analysis
//!
//! Extracts compact feature fingerprints from short audio and MIDI samples,
//! labels each element (break, bass, ambient, drums), renders diagnostic
//! plots and writes the results as JSON for downstream tools.

pub mod analysis;
pub mod audio;
pub mod classify;
pub mod config;
pub mod error;
pub mod midi;
pub mod plots;
pub mod sample;
pub mod spectral;
pub mod visualize;

pub use analysis::{
    Catalog, ElementCatalog, ElementRecord, FileMetadata, Fingerprint, Outcome, VisualizationEntry,
};
pub use audio::AudioFeatures;
pub use classify::{classify, Classifier, ElementType};
pub use config::Config;
pub use error::{ElementError, ExtractionError, Result};
pub use midi::MidiFeatures;
pub use sample::{FileType, Sample};

use log::{info, warn};
use std::path::{Path, PathBuf};

/// File name of the full analysis document
pub const ANALYSIS_FILE: &str = "element_analysis.json";
/// File name of the reduced visualization document
pub const VISUALIZATION_FILE: &str = "visualization_data.json";

/// What a batch run wrote
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub analysis_path: PathBuf,
    pub visualization_path: PathBuf,
    pub image_dir: Option<PathBuf>,
    pub element_count: usize,
    pub failures: usize,
}

/// Batch analyzer over a configured sample layout
pub struct ElementAnalyzer {
    config: Config,
    classifier: Classifier,
}

impl ElementAnalyzer {
    /// Create an analyzer with the given configuration
    pub fn new(config: Config) -> Self {
        let classifier = Classifier::new(config.classification.clone());
        Self { config, classifier }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Image directory of a batch run, None when images are disabled
    pub fn image_dir(&self) -> Option<PathBuf> {
        self.config
            .visualization
            .generate_images
            .then(|| self.config.paths.image_dir())
    }

    /// Run the extractor matching the sample's file type
    pub fn extract(&self, sample: &Sample, image_dir: Option<&Path>) -> Outcome {
        let extracted = match sample.file_type {
            FileType::Midi => {
                info!("Analyzing MIDI: {}", sample.file_name());
                midi::analyze_midi_file(&sample.path, &self.config).map(Fingerprint::Midi)
            }
            FileType::Audio => {
                info!("Analyzing audio: {}", sample.file_name());
                audio::analyze_audio_file(&sample.path, &sample.name, image_dir, &self.config)
                    .map(Fingerprint::Audio)
            }
            FileType::Unknown => Err(ElementError::UnsupportedType(sample.extension())),
        };
        extracted.map_err(|err| ExtractionError::from_error(sample.file_type, &err))
    }

    /// Extract, attach metadata and classify one sample
    pub fn analyze_sample(&self, sample: &Sample, image_dir: Option<&Path>) -> ElementRecord {
        let fingerprint = self.extract(sample, image_dir);
        if let Err(err) = &fingerprint {
            warn!("Failed to analyze {}: {}", sample.file_name(), err.message);
        }
        let element_type = self.classifier.classify(&sample.name, &fingerprint);
        ElementRecord {
            fingerprint,
            metadata: FileMetadata::from(sample),
            element_type,
        }
    }

    /// Analyze one file, rendering images when enabled
    pub fn analyze_element<P: AsRef<Path>>(&self, path: P) -> ElementRecord {
        let sample = Sample::new(path.as_ref());
        let image_dir = self.image_dir();
        self.analyze_sample(&sample, image_dir.as_deref())
    }

    /// Analyze samples strictly in order; failures are stored, not raised
    pub fn analyze_batch(&self, samples: &[Sample]) -> ElementCatalog {
        let image_dir = self.image_dir();
        let mut catalog = ElementCatalog::new();
        for sample in samples {
            info!("Analyzing {}...", sample.name);
            let record = self.analyze_sample(sample, image_dir.as_deref());
            catalog.insert(sample.name.clone(), record);
        }
        catalog
    }

    /// Discover, analyze and write both JSON documents.
    ///
    /// Returns None (and writes nothing) when no samples are found.
    pub fn run(&self) -> Result<Option<BatchSummary>> {
        let paths = &self.config.paths;
        let samples = sample::discover_samples(paths);
        if samples.is_empty() {
            warn!(
                "No MIDI or audio files found in {}",
                paths.input_dir.display()
            );
            return Ok(None);
        }

        std::fs::create_dir_all(&paths.output_dir)?;
        let image_dir = self.image_dir();
        if let Some(dir) = &image_dir {
            std::fs::create_dir_all(dir)?;
        }

        let catalog = self.analyze_batch(&samples);
        let failures = catalog.iter().filter(|(_, record)| !record.is_ok()).count();

        let analysis_path = paths.output_dir.join(ANALYSIS_FILE);
        analysis::write_json(&analysis_path, &catalog)?;

        let visualization_path = paths.output_dir.join(VISUALIZATION_FILE);
        let projection = analysis::visualization_data(&catalog, &paths.image_subdir);
        analysis::write_json(&visualization_path, &projection)?;

        info!(
            "Analyzed {} elements ({} failed)",
            catalog.len(),
            failures
        );

        Ok(Some(BatchSummary {
            analysis_path,
            visualization_path,
            image_dir,
            element_count: catalog.len(),
            failures,
        }))
    }

    /// Render the per-type visualization images and metadata document
    pub fn run_visualization_pass(&self) -> Result<Catalog<visualize::VisualizationRecord>> {
        visualize::run_visualization_pass(&self.config)
    }
}

/// Validate configuration and the input directory
pub fn validate_input(config: &Config) -> Result<()> {
    config::validate_config(config).map_err(|e| ElementError::Config(e.to_string()))?;
    if !config.paths.input_dir.is_dir() {
        return Err(ElementError::Config(format!(
            "Input directory does not exist: {}",
            config.paths.input_dir.display()
        )));
    }
    Ok(())
}
