use crate::{convert, riff::RiffCodec, FileFilters};
use std::path::PathBuf;

#[derive(clap::Args)]
pub struct Args {
    /// E4B or SoundFont2 file to inspect
    input: PathBuf,
    /// Glob patterns to include preset/sample names
    #[arg(short, long)]
    include: Vec<String>,
}

fn display_loop(looping: bool, release: bool, start: u32, end: u32) -> String {
    if !looping {
        return String::new();
    }
    format!(
        " {: <4} {: <10} {}",
        if release { "rel" } else { "hold" },
        start,
        end,
    )
}

pub fn inspect(args: Args) -> std::io::Result<()> {
    let Args { input, include } = args;
    let verbose = crate::is_log_level(log::LevelFilter::Debug);
    let filters = FileFilters {
        includes: include,
        excludes: Vec::new(),
    };

    let data = std::fs::read(&input)?;
    let options = convert::Options::default();
    let mut diag = convert::Diagnostics::default();
    let bank = match convert::detect(&data) {
        Some(convert::Format::E4b) => {
            log::info!("E4B bank `{}`", input.display());
            convert::decode_e4b(&data, &options, &mut diag)?
        }
        Some(convert::Format::Sf2) => {
            log::info!("SoundFont2 `{}`", input.display());
            convert::decode_sf2(&RiffCodec, &data, &options, &mut diag)?
        }
        None => {
            return Err(crate::invalid_data(format!(
                "`{}` is neither E4B (FORM) nor SoundFont2 (RIFF)",
                input.display()
            )))
        }
    };

    log::info!("Name: {}", bank.name);
    match bank.default_preset {
        Some(p) => log::info!("Startup preset: {p}"),
        None => log::info!("Startup preset: none"),
    }

    log::info!("Presets: {}", bank.presets.len());
    if !bank.presets.is_empty() {
        log::info!("    VOICE KEYS    VELS    ROOT SAMPLE FINE    COARSE VOL PAN FILTER  RES   CORDS");
        for preset in &bank.presets {
            if !filters.is_empty() && !filters.matches(&preset.name.display()) {
                continue;
            }
            log::info!("  PRESET {: <3} {}", preset.index, preset.name.display());
            for (index, voice) in preset.voices.iter().enumerate() {
                log::info!(
                    "    {index: <5} {: <3}-{: <3} {: <3}-{: <3} {: <4} {: <6} {: <7} {: <6} {: <3} {: <3} {: <7} {: <5} {}",
                    voice.key_low,
                    voice.key_high,
                    voice.vel_low,
                    voice.vel_high,
                    voice.original_key,
                    voice.sample_index,
                    voice.fine_tune_cents,
                    voice.coarse_tune as i16 + voice.transpose as i16,
                    voice.volume,
                    voice.pan,
                    voice.filter_frequency_hz.round(),
                    voice.filter_resonance_percent,
                    voice.cords.len(),
                );
                if verbose {
                    for (source, dest, amount) in voice.cords.iter() {
                        log::debug!("      CORD {source:?} -> {dest:?} {amount:+.1}%");
                    }
                }
            }
        }
    }

    log::info!("Samples: {}", bank.samples.len());
    if !bank.samples.is_empty() {
        log::info!("  INDEX NAME             FRAMES     CH RATE   LOOP START      END        HASH");
        for (index, sample) in bank.samples.iter().enumerate() {
            if !filters.is_empty() && !filters.matches(&sample.name.display()) {
                continue;
            }
            let pcm: Vec<u8> = sample.frames.iter().flat_map(|s| s.to_le_bytes()).collect();
            let hash = blake3::hash(&pcm);
            log::info!(
                "  {index: <5} {: <16} {: <10} {: <2} {: <6}{: <27} 0x{hash}",
                sample.name.display(),
                sample.frames.len(),
                sample.channels,
                sample.sample_rate,
                display_loop(sample.looping, sample.loop_release, sample.loop_start, sample.loop_end),
            );
        }
    }

    log::info!("Sequences: {}", bank.sequences.len());
    if !bank.sequences.is_empty() {
        log::info!("  INDEX NAME             SIZE");
        for (index, sequence) in bank.sequences.iter().enumerate() {
            log::info!(
                "  {index: <5} {: <16} 0x{: <8x}",
                sequence.name.display(),
                sequence.data.len(),
            );
        }
    }
    if !diag.is_empty() {
        log::info!("Diagnostics: {}", diag.len());
    }
    Ok(())
}
