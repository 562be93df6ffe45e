//! The generated ensemble and its forward-only member cursor.

use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use sw_types::{InputRecord, OutputRecord, Settings, SwError, SwResult};

use crate::config::WriterConfig;
use crate::generator;
use crate::spec::{EnsembleKind, EnsembleSpec};
use crate::writer::{self, Table};

/// An ordered set of members, each an immutable input record paired with a
/// mutable output record, traversed with a single forward cursor.
#[derive(Debug, Clone)]
pub struct Ensemble {
    kind: EnsembleKind,
    settings: Arc<Settings>,
    members: Vec<(InputRecord, OutputRecord)>,
    position: usize,
}

impl Ensemble {
    /// Generates the members described by `spec`.
    pub fn from_spec(spec: &EnsembleSpec, settings: Arc<Settings>) -> SwResult<Self> {
        let inputs = generator::generate(spec, &settings)?;
        let mut members = generator::allocate(inputs.len(), || {
            format!("{} members with outputs", inputs.len())
        })?;
        members.extend(inputs.into_iter().map(|input| (input, OutputRecord::new())));
        info!("Generated {} ensemble with {} members", spec.kind(), members.len());
        Ok(Self {
            kind: spec.kind(),
            settings,
            members,
            position: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn kind(&self) -> EnsembleKind {
        self.kind
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Sorted names of the input parameters every member carries.
    pub fn parameter_names(&self) -> &[String] {
        self.members
            .first()
            .map(|(input, _)| input.schema().names())
            .unwrap_or(&[])
    }

    /// Advances the cursor and exposes the member it lands on.
    ///
    /// Returns `None` once every member has been visited, and keeps returning
    /// `None` until [`Ensemble::reset`] is called.
    pub fn next_member(&mut self) -> Option<(&InputRecord, &mut OutputRecord)> {
        let (input, output) = self.members.get_mut(self.position)?;
        self.position += 1;
        Some((&*input, output))
    }

    /// Moves the cursor back before the first member. Outputs are kept.
    pub fn reset(&mut self) {
        debug!("Rewinding ensemble cursor from {}", self.position);
        self.position = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.members.len()
    }

    /// Visits every remaining member in order, leaving the cursor exhausted.
    ///
    /// Stops at the first member for which `f` fails and returns that error;
    /// the cursor is then left just past the failing member.
    pub fn process<F>(&mut self, mut f: F) -> SwResult<()>
    where
        F: FnMut(&InputRecord, &mut OutputRecord) -> SwResult<()>,
    {
        let remaining = self.remaining()?;
        for (input, output) in &mut self.members[remaining] {
            self.position += 1;
            f(&*input, output)?;
        }
        Ok(())
    }

    /// Like [`Ensemble::process`], but evaluates members on the rayon pool.
    /// Each call of `f` gets exclusive access to one member's outputs. The
    /// cursor ends exhausted even when `f` fails.
    pub fn par_process<F>(&mut self, f: F) -> SwResult<()>
    where
        F: Fn(&InputRecord, &mut OutputRecord) -> SwResult<()> + Sync + Send,
    {
        let remaining = self.remaining()?;
        debug!(
            "Processing {} members on {} threads",
            self.members.len() - remaining.start,
            rayon::current_num_threads()
        );
        self.position = self.members.len();
        self.members[remaining]
            .par_iter_mut()
            .try_for_each(|(input, output)| f(&*input, output))
    }

    fn remaining(&self) -> SwResult<std::ops::RangeFrom<usize>> {
        if self.is_exhausted() {
            return Err(SwError::AlreadyExhausted {
                size: self.members.len(),
            });
        }
        Ok(self.position..)
    }

    /// Columnar view of settings, inputs and outputs, for the serializers.
    pub(crate) fn table(&self) -> Table<'_> {
        Table::new(&self.settings, &self.members)
    }

    /// Writes the ensemble as a Python module, honouring
    /// `SKYWALKER_REAL_PRECISION`.
    pub fn write(&self, path: impl AsRef<Path>) -> SwResult<()> {
        self.write_with(path, &WriterConfig::from_env())
    }

    pub fn write_with(&self, path: impl AsRef<Path>, config: &WriterConfig) -> SwResult<()> {
        writer::write_table(path.as_ref(), &self.table(), config)
    }

    /// Renders the ensemble to text without touching the filesystem.
    pub fn render(&self, config: &WriterConfig) -> SwResult<String> {
        writer::writer_for(config).render(&self.table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ParameterAxis;
    use crate::writer::OutputFormat;
    use sw_types::ErrorCode;

    fn small() -> Ensemble {
        let spec = EnsembleSpec::lattice(vec![
            ParameterAxis::fixed("p1", 1.0),
            ParameterAxis::range("tick", 0.0, 10.0, 11),
        ]);
        let settings = Settings::from_pairs([("param1", "hello")]).unwrap();
        Ensemble::from_spec(&spec, Arc::new(settings)).unwrap()
    }

    #[test]
    fn cursor_visits_every_member_once() {
        let mut ensemble = small();
        assert_eq!(ensemble.size(), 11);
        assert_eq!(ensemble.kind(), EnsembleKind::Lattice);
        let mut ticks = Vec::new();
        while let Some((input, output)) = ensemble.next_member() {
            ticks.push(input.get("tick").unwrap());
            output.set("qoi", 4.0);
        }
        assert_eq!(ticks.len(), 11);
        assert!(ticks.iter().all(|t| (0.0..=10.0).contains(t)));
        assert!(ensemble.is_exhausted());

        // Exhaustion is idempotent.
        assert!(ensemble.next_member().is_none());
        assert!(ensemble.next_member().is_none());

        let text = ensemble.render(&WriterConfig::default()).unwrap();
        assert!(text.contains(&format!("output.qoi = [{}]", vec!["4"; 11].join(", "))));
    }

    #[test]
    fn reset_rewinds_and_keeps_outputs() {
        let mut ensemble = small();
        ensemble
            .process(|_, output| {
                output.set("y", 1.0);
                Ok(())
            })
            .unwrap();
        assert!(ensemble.is_exhausted());
        ensemble.reset();
        let (input, output) = ensemble.next_member().unwrap();
        assert_eq!(input.get("tick").unwrap(), 0.0);
        assert_eq!(output.get("y").unwrap(), 1.0);
    }

    #[test]
    fn process_on_exhausted_cursor_fails() {
        let mut ensemble = small();
        ensemble.process(|_, _| Ok(())).unwrap();
        let err = ensemble.process(|_, _| Ok(())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExhausted);
        let err = ensemble.par_process(|_, _| Ok(())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExhausted);
    }

    #[test]
    fn process_continues_from_cursor() {
        let mut ensemble = small();
        ensemble.next_member();
        ensemble.next_member();
        let mut visited = 0;
        ensemble
            .process(|_, _| {
                visited += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, 9);
    }

    #[test]
    fn process_stops_at_first_error() {
        let mut ensemble = small();
        let err = ensemble
            .process(|input, output| {
                let tick = input.get("tick")?;
                if tick >= 3.0 {
                    input.get("nonexistent")?;
                }
                output.set("tick2", tick * 2.0);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParamNotFound);

        // Members 0..=3 were visited; the rest remain.
        let (input, _) = ensemble.next_member().unwrap();
        assert_eq!(input.get("tick").unwrap(), 4.0);
    }

    #[test]
    fn par_process_matches_sequential() {
        let mut sequential = small();
        sequential
            .process(|input, output| {
                output.set("sq", input.get("tick")?.powi(2));
                Ok(())
            })
            .unwrap();
        let mut parallel = small();
        parallel
            .par_process(|input, output| {
                output.set("sq", input.get("tick")?.powi(2));
                Ok(())
            })
            .unwrap();
        let config = WriterConfig::default().with_format(OutputFormat::Json);
        assert_eq!(
            sequential.render(&config).unwrap(),
            parallel.render(&config).unwrap()
        );
    }

    #[test]
    fn write_to_file() {
        let mut ensemble = small();
        ensemble
            .process(|_, output| {
                output.set("qoi", 4.0);
                Ok(())
            })
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.py");
        ensemble.write_with(&path, &WriterConfig::default()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("settings.param1 = 'hello'"));
        assert!(text.contains("input.p1 = [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1]"));
        assert!(text.contains("input.tick = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]"));
    }

    #[test]
    fn parameter_names_are_sorted() {
        let ensemble = small();
        assert_eq!(ensemble.parameter_names(), &["p1".to_string(), "tick".to_string()]);
    }
}
