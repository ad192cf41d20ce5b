use crate::{
    bank::{Envelope, Soundbank},
    e4b, invalid_data, riff, soundfont,
    soundfont::Sf2Codec,
};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Conversion knobs. All default to off; the library surface takes these by
/// reference so one `Options` can drive both directions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Options {
    /// Negate the pan of every decoded voice.
    pub flip_pan: bool,
    /// Carry chorus width and LFO shape through reserved SoundFont
    /// generator ids that stock players ignore.
    pub extended_data: bool,
    /// Substitute this envelope wherever a decoded filter envelope is
    /// all-zero.
    pub filter_env_defaults: Option<Envelope>,
}

/// One recoverable loss of information during a conversion. Anything that
/// would corrupt the output instead of degrading it is an `io::Error`, not a
/// diagnostic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Diagnostic {
    UnmappableRouting { source: String, dest: String },
    UnsupportedSample { name: String, reason: String },
    UnknownChunk { tag: [u8; 4] },
    DroppedSequence { name: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnmappableRouting { source, dest } => {
                write!(f, "routing {source} -> {dest} has no equivalent; dropped")
            }
            Self::UnsupportedSample { name, reason } => {
                write!(f, "sample `{name}` skipped: {reason}")
            }
            Self::UnknownChunk { tag } => {
                write!(f, "unknown chunk `{}` skipped", String::from_utf8_lossy(tag))
            }
            Self::DroppedSequence { name } => {
                write!(f, "sequence `{name}` has no destination; dropped")
            }
        }
    }
}

/// Accumulator threaded through decode and mapping. Each entry is logged once
/// when it is reported and kept for callers that want to act on the list.
#[derive(Debug, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn report(&mut self, d: Diagnostic) {
        log::warn!("{d}");
        self.0.push(d);
    }
    #[inline]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.0
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Input kind, detected from the leading signature rather than the file
/// extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    E4b,
    Sf2,
}

pub fn detect(data: &[u8]) -> Option<Format> {
    match data.get(..4)? {
        b"FORM" => Some(Format::E4b),
        b"RIFF" => Some(Format::Sf2),
        _ => None,
    }
}

fn apply_options(bank: &mut Soundbank, options: &Options) {
    for preset in &mut bank.presets {
        for voice in &mut preset.voices {
            if options.flip_pan {
                voice.pan = voice.pan.saturating_neg();
            }
            if let Some(env) = options.filter_env_defaults {
                if voice.filter_env.is_zero() {
                    voice.filter_env = env;
                }
            }
        }
    }
}

/// Decodes an E4B image and applies the option post-passes.
pub fn decode_e4b(
    data: &[u8],
    options: &Options,
    diag: &mut Diagnostics,
) -> io::Result<Soundbank> {
    let mut bank = e4b::decode(data, diag)?;
    apply_options(&mut bank, options);
    Ok(bank)
}

pub fn encode_e4b(bank: &Soundbank) -> io::Result<Vec<u8>> {
    e4b::encode(bank)
}

/// Decodes a SoundFont2 image through `codec` and maps it to a bank.
pub fn decode_sf2(
    codec: &impl Sf2Codec,
    data: &[u8],
    options: &Options,
    diag: &mut Diagnostics,
) -> io::Result<Soundbank> {
    let font = codec.read(data)?;
    let mut bank = soundfont::bank_from_font(&font, options, diag);
    apply_options(&mut bank, options);
    Ok(bank)
}

/// Maps a bank to SoundFont2 and writes it through `codec`.
pub fn encode_sf2(
    codec: &impl Sf2Codec,
    bank: &Soundbank,
    options: &Options,
    diag: &mut Diagnostics,
    w: &mut dyn io::Write,
) -> io::Result<()> {
    let font = soundfont::font_from_bank(bank, options, diag);
    codec.write(&font, w)
}

// Shape used when --filter-env-defaults asks for "a usable envelope" without
// spelling one out: instant attack, full sustain, short release.
fn default_filter_env() -> Envelope {
    Envelope {
        sustain: 100.0,
        release_secs: 0.3,
        ..Envelope::default()
    }
}

#[derive(clap::Args)]
pub struct Args {
    /// Input file; E4B or SoundFont2, detected by signature
    file: PathBuf,
    /// Output path (defaults to the input with the other extension)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Negate the pan of every voice
    #[arg(long, default_value_t = false)]
    flip_pan: bool,
    /// Keep chorus width and LFO shape in reserved SoundFont generators
    #[arg(short = 'x', long, default_value_t = false)]
    extended_data: bool,
    /// Replace all-zero filter envelopes with a usable default
    #[arg(long, default_value_t = false)]
    filter_env_defaults: bool,
}

pub fn convert(args: Args) -> io::Result<()> {
    let data = fs::read(&args.file)?;
    let options = Options {
        flip_pan: args.flip_pan,
        extended_data: args.extended_data,
        filter_env_defaults: args.filter_env_defaults.then(default_filter_env),
    };
    let mut diag = Diagnostics::default();
    let codec = riff::RiffCodec;

    let (bytes, extension) = match detect(&data) {
        Some(Format::E4b) => {
            log::info!("converting E4B bank `{}` to SoundFont2", args.file.display());
            let bank = decode_e4b(&data, &options, &mut diag)?;
            let mut buf = Vec::new();
            encode_sf2(&codec, &bank, &options, &mut diag, &mut buf)?;
            (buf, "sf2")
        }
        Some(Format::Sf2) => {
            log::info!("converting SoundFont2 `{}` to E4B", args.file.display());
            let bank = decode_sf2(&codec, &data, &options, &mut diag)?;
            (encode_e4b(&bank)?, "e4b")
        }
        None => {
            return Err(invalid_data(format!(
                "`{}` is neither E4B (FORM) nor SoundFont2 (RIFF)",
                args.file.display()
            )))
        }
    };

    let output = args
        .output
        .unwrap_or_else(|| args.file.with_extension(extension));
    fs::write(&output, &bytes)?;
    if !diag.is_empty() {
        log::warn!("{} item(s) did not survive the conversion", diag.len());
    }
    log::info!("wrote `{}` ({} bytes)", output.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::*;

    #[test]
    fn signature_detection() {
        assert_eq!(detect(b"FORM\0\0\0\0E4B0"), Some(Format::E4b));
        assert_eq!(detect(b"RIFF\0\0\0\0sfbk"), Some(Format::Sf2));
        assert_eq!(detect(b"MThd"), None);
        assert_eq!(detect(b"FO"), None);
    }

    #[test]
    fn flip_pan_negates_each_voice() {
        let mut bank = Soundbank::default();
        bank.presets.push(Preset {
            index: 0,
            name: BankName::new("p"),
            voices: vec![
                Voice {
                    pan: 30,
                    ..Voice::default()
                },
                Voice {
                    pan: i8::MIN,
                    ..Voice::default()
                },
            ],
        });
        apply_options(
            &mut bank,
            &Options {
                flip_pan: true,
                ..Options::default()
            },
        );
        assert_eq!(bank.presets[0].voices[0].pan, -30);
        // i8::MIN saturates instead of wrapping back to itself
        assert_eq!(bank.presets[0].voices[1].pan, 127);
    }

    #[test]
    fn filter_env_defaults_only_replace_zero_envelopes() {
        let mut bank = Soundbank::default();
        let shaped = Envelope {
            attack_secs: 0.5,
            sustain: 40.0,
            ..Envelope::default()
        };
        bank.presets.push(Preset {
            index: 0,
            name: BankName::new("p"),
            voices: vec![
                Voice::default(),
                Voice {
                    filter_env: shaped,
                    ..Voice::default()
                },
            ],
        });
        apply_options(
            &mut bank,
            &Options {
                filter_env_defaults: Some(default_filter_env()),
                ..Options::default()
            },
        );
        assert_eq!(bank.presets[0].voices[0].filter_env, default_filter_env());
        assert_eq!(bank.presets[0].voices[1].filter_env, shaped);
    }
}
