use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use stepdaw::{
    audio::bounce,
    instrument::{AcidSettings, Instrument, SynthSettings},
    pitch::{Note, NoteLength},
    project::Project,
    sample::{FileFetcher, SampleBank},
};

fn busy_project() -> Project {
    let mut project = Project::empty();
    let lead = project.add_track("Lead", Instrument::Synth(SynthSettings::default()));
    let bass = project.add_track("Bass", Instrument::Acid(AcidSettings::default()));
    for step in 0..16 {
        project.toggle_step(&bass, 1, step);
    }
    for (i, name) in ["C3", "E3", "G3", "B3"].iter().enumerate() {
        let note: Note = name.parse().unwrap_or_default();
        project.toggle_note(&lead, 1, note, (i * 4) as u8, NoteLength::Half);
    }
    project.set_reverb(&lead, true);
    project.set_delay(&bass, true);
    project
}

fn render_bar(c: &mut Criterion) {
    let project = busy_project();
    c.bench_function("bounce", |b| b.iter(|| {
        let samples = SampleBank::new(Arc::new(FileFetcher { root: "samples".into() }));
        black_box(bounce(project.clone(), 1, 44100.0, samples))
    }));
}

criterion_group!(benches, render_bar);
criterion_main!(benches);
