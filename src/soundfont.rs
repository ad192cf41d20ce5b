use crate::{
    bank::*,
    convert::{Diagnostic, Diagnostics, Options},
};

/// SoundFont2 object model as produced/consumed by an [`Sf2Codec`]. The
/// semantic mapper below only ever touches these records, never sfbk bytes,
/// so any conforming codec can be substituted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sf2Font {
    pub name: String,
    pub presets: Vec<Sf2Preset>,
    pub instruments: Vec<Sf2Instrument>,
    pub samples: Vec<Sf2Sample>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sf2Preset {
    pub name: String,
    pub program: u16,
    pub bank: u16,
    pub zones: Vec<Sf2Zone>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sf2Instrument {
    pub name: String,
    pub zones: Vec<Sf2Zone>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sf2Zone {
    pub generators: Vec<Generator>,
    pub modulators: Vec<Modulator>,
}

impl Sf2Zone {
    pub fn generator(&self, oper: u16) -> Option<i16> {
        self.generators
            .iter()
            .find(|g| g.oper == oper)
            .map(|g| g.amount)
    }
    /// A zone that names no sample (instrument level) or no instrument
    /// (preset level) is a global zone supplying defaults for the rest.
    pub fn is_global(&self, terminal: u16) -> bool {
        self.generator(terminal).is_none()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Generator {
    pub oper: u16,
    pub amount: i16,
}

impl Generator {
    #[inline]
    pub fn new(oper: u16, amount: i16) -> Self {
        Self { oper, amount }
    }
    #[inline]
    pub fn range(oper: u16, low: u8, high: u8) -> Self {
        Self::new(oper, i16::from_le_bytes([low, high]))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Modulator {
    /// Raw SFModulator source word: controller index, CC flag (bit 7),
    /// direction (bit 8), polarity (bit 9), type (bits 10-15).
    pub source: u16,
    /// Destination generator id.
    pub dest: u16,
    pub amount: i16,
    pub amount_source: u16,
    pub transform: u16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sf2Sample {
    pub name: String,
    pub frames: Vec<i16>,
    pub sample_rate: u32,
    pub original_key: u8,
    pub correction: i8,
    /// Frame offsets relative to the start of this sample.
    pub loop_start: u32,
    pub loop_end: u32,
    /// 1 = mono; anything else is a recognized-but-unsupported link type.
    pub sample_type: u16,
    pub link: u16,
}

pub const SAMPLE_TYPE_MONO: u16 = 1;

/// Byte codec capability; see `riff::RiffCodec` for the built-in one.
pub trait Sf2Codec {
    fn read(&self, data: &[u8]) -> std::io::Result<Sf2Font>;
    fn write(&self, font: &Sf2Font, w: &mut dyn std::io::Write) -> std::io::Result<()>;
}

pub struct Gen;
impl Gen {
    pub const MOD_LFO_TO_PITCH: u16 = 5;
    pub const VIB_LFO_TO_PITCH: u16 = 6;
    pub const MOD_ENV_TO_PITCH: u16 = 7;
    pub const INITIAL_FILTER_FC: u16 = 8;
    pub const INITIAL_FILTER_Q: u16 = 9;
    pub const MOD_LFO_TO_FILTER_FC: u16 = 10;
    pub const MOD_ENV_TO_FILTER_FC: u16 = 11;
    pub const MOD_LFO_TO_VOLUME: u16 = 13;
    pub const CHORUS_SEND: u16 = 15;
    pub const PAN: u16 = 17;
    pub const DELAY_MOD_LFO: u16 = 21;
    pub const FREQ_MOD_LFO: u16 = 22;
    pub const DELAY_MOD_ENV: u16 = 25;
    pub const ATTACK_MOD_ENV: u16 = 26;
    pub const HOLD_MOD_ENV: u16 = 27;
    pub const DECAY_MOD_ENV: u16 = 28;
    pub const SUSTAIN_MOD_ENV: u16 = 29;
    pub const RELEASE_MOD_ENV: u16 = 30;
    pub const DELAY_VOL_ENV: u16 = 33;
    pub const ATTACK_VOL_ENV: u16 = 34;
    pub const HOLD_VOL_ENV: u16 = 35;
    pub const DECAY_VOL_ENV: u16 = 36;
    pub const SUSTAIN_VOL_ENV: u16 = 37;
    pub const RELEASE_VOL_ENV: u16 = 38;
    pub const INSTRUMENT: u16 = 41;
    pub const KEY_RANGE: u16 = 43;
    pub const VEL_RANGE: u16 = 44;
    pub const INITIAL_ATTENUATION: u16 = 48;
    pub const COARSE_TUNE: u16 = 51;
    pub const FINE_TUNE: u16 = 52;
    pub const SAMPLE_ID: u16 = 53;
    pub const SAMPLE_MODES: u16 = 54;
    pub const OVERRIDING_ROOT_KEY: u16 = 58;
    // converter extensions parked on reserved opers, gated by
    // Options::extended_data
    pub const EXT_CHORUS_WIDTH: u16 = 14;
    pub const EXT_LFO1_SHAPE: u16 = 18;
    pub const EXT_LFO1_KEY_SYNC: u16 = 19;
}

// SFModulator source word pieces
const MOD_SRC_CC: u16 = 1 << 7;
const MOD_SRC_NEGATIVE: u16 = 1 << 8;
const MOD_SRC_BIPOLAR: u16 = 1 << 9;
const SRC_VELOCITY: u16 = 2;
const SRC_KEY: u16 = 3;
const SRC_CHANNEL_PRESSURE: u16 = 13;
const SRC_PITCH_WHEEL: u16 = 14;
const CC_MOD_WHEEL: u16 = 1;
const CC_MIDI_A: u16 = 21;
const CC_MIDI_B: u16 = 22;
const CC_PEDAL: u16 = 64;
const CC_FOOTSWITCH_1: u16 = 65;

const TC_ZERO: i16 = -12000;
const ABS_CENT_REF_HZ: f64 = 8.176;

#[inline]
fn secs_to_timecents(secs: f64) -> i16 {
    if secs <= 0.0 {
        return TC_ZERO;
    }
    (1200.0 * secs.log2()).round().clamp(-12000.0, 8000.0) as i16
}

#[inline]
fn timecents_to_secs(tc: i16) -> f64 {
    if tc <= TC_ZERO {
        return 0.0;
    }
    (tc as f64 / 1200.0).exp2()
}

#[inline]
fn hz_to_abs_cents(hz: f64) -> i16 {
    (1200.0 * (hz.max(1.0) / ABS_CENT_REF_HZ).log2()).round() as i16
}

#[inline]
fn abs_cents_to_hz(cents: i16) -> f64 {
    ABS_CENT_REF_HZ * (cents as f64 / 1200.0).exp2()
}

#[inline]
fn db_atten_to_cb(db: f64) -> i16 {
    (-db * 10.0).round().clamp(0.0, 1440.0) as i16
}

#[inline]
fn cb_to_db_atten(cb: i16) -> f64 {
    -(cb.max(0) as f64) / 10.0
}

const PAN_FULL: f64 = 500.0;

#[inline]
fn pan_to_permille(pan: i8) -> i16 {
    (pan as f64 * PAN_FULL / 64.0).round() as i16
}

#[inline]
fn permille_to_pan(p: i16) -> i8 {
    (p as f64 * 64.0 / PAN_FULL).round().clamp(-64.0, 63.0) as i8
}

const Q_FULL_CB: f64 = 960.0;

// Full-scale (100 %) realtime-control depths per destination family.
const DEPTH_PITCH_CENTS: f64 = 1200.0;
const DEPTH_FILTER_CENTS: f64 = 9600.0;
const DEPTH_VOLUME_CB: f64 = 960.0;
const DEPTH_TIME_CENTS: f64 = 1200.0;

#[inline]
fn depth_amount(percent: f64, full: f64) -> i16 {
    (percent / 100.0 * full).round() as i16
}

#[inline]
fn depth_percent(amount: i16, full: f64) -> f64 {
    amount as f64 * 100.0 / full
}

fn mod_source_raw(source: CordSource) -> Option<u16> {
    Some(match source {
        CordSource::KeyPolarityPositive => SRC_KEY,
        CordSource::KeyPolarityCenter => SRC_KEY | MOD_SRC_BIPOLAR,
        CordSource::VelocityPolarityPositive => SRC_VELOCITY,
        CordSource::VelocityPolarityCenter => SRC_VELOCITY | MOD_SRC_BIPOLAR,
        CordSource::VelocityPolarityLess => SRC_VELOCITY | MOD_SRC_NEGATIVE,
        CordSource::PitchWheel => SRC_PITCH_WHEEL,
        CordSource::ModWheel => CC_MOD_WHEEL | MOD_SRC_CC,
        CordSource::ChannelPressure => SRC_CHANNEL_PRESSURE,
        CordSource::Pedal => CC_PEDAL | MOD_SRC_CC,
        CordSource::MidiA => CC_MIDI_A | MOD_SRC_CC,
        CordSource::MidiB => CC_MIDI_B | MOD_SRC_CC,
        CordSource::Footswitch1 => CC_FOOTSWITCH_1 | MOD_SRC_CC,
        _ => return None,
    })
}

fn mod_source_from_raw(raw: u16) -> Option<CordSource> {
    Some(match raw {
        x if x == SRC_KEY => CordSource::KeyPolarityPositive,
        x if x == SRC_KEY | MOD_SRC_BIPOLAR => CordSource::KeyPolarityCenter,
        x if x == SRC_VELOCITY => CordSource::VelocityPolarityPositive,
        x if x == SRC_VELOCITY | MOD_SRC_BIPOLAR => CordSource::VelocityPolarityCenter,
        x if x == SRC_VELOCITY | MOD_SRC_NEGATIVE => CordSource::VelocityPolarityLess,
        x if x == SRC_PITCH_WHEEL => CordSource::PitchWheel,
        x if x == CC_MOD_WHEEL | MOD_SRC_CC => CordSource::ModWheel,
        x if x == SRC_CHANNEL_PRESSURE => CordSource::ChannelPressure,
        x if x == CC_PEDAL | MOD_SRC_CC => CordSource::Pedal,
        x if x == CC_MIDI_A | MOD_SRC_CC => CordSource::MidiA,
        x if x == CC_MIDI_B | MOD_SRC_CC => CordSource::MidiB,
        x if x == CC_FOOTSWITCH_1 | MOD_SRC_CC => CordSource::Footswitch1,
        _ => return None,
    })
}

/// Destination half of the modulator whitelist: generator id plus the
/// full-scale amount for 100 %. Sign convention: attenuation destinations
/// invert so that a positive cord amount raises volume.
fn mod_dest(dest: CordDest) -> Option<(u16, f64, bool)> {
    Some(match dest {
        CordDest::Pitch => (Gen::FINE_TUNE, DEPTH_PITCH_CENTS, false),
        CordDest::Vibrato => (Gen::VIB_LFO_TO_PITCH, DEPTH_PITCH_CENTS, false),
        CordDest::FilterFrequency => (Gen::INITIAL_FILTER_FC, DEPTH_FILTER_CENTS, false),
        CordDest::FilterResonance => (Gen::INITIAL_FILTER_Q, DEPTH_VOLUME_CB, false),
        CordDest::AmpVolume => (Gen::INITIAL_ATTENUATION, DEPTH_VOLUME_CB, true),
        CordDest::AmpPan => (Gen::PAN, PAN_FULL, false),
        CordDest::AmpEnvAttack => (Gen::ATTACK_VOL_ENV, DEPTH_TIME_CENTS, false),
        CordDest::FilterEnvAttack => (Gen::ATTACK_MOD_ENV, DEPTH_TIME_CENTS, false),
        // KeySustain has no SoundFont counterpart
        _ => return None,
    })
}

fn mod_dest_from_gen(gen: u16) -> Option<(CordDest, f64, bool)> {
    Some(match gen {
        Gen::FINE_TUNE => (CordDest::Pitch, DEPTH_PITCH_CENTS, false),
        Gen::VIB_LFO_TO_PITCH => (CordDest::Vibrato, DEPTH_PITCH_CENTS, false),
        Gen::INITIAL_FILTER_FC => (CordDest::FilterFrequency, DEPTH_FILTER_CENTS, false),
        Gen::INITIAL_FILTER_Q => (CordDest::FilterResonance, DEPTH_VOLUME_CB, false),
        Gen::INITIAL_ATTENUATION => (CordDest::AmpVolume, DEPTH_VOLUME_CB, true),
        Gen::PAN => (CordDest::AmpPan, PAN_FULL, false),
        Gen::ATTACK_VOL_ENV => (CordDest::AmpEnvAttack, DEPTH_TIME_CENTS, false),
        Gen::ATTACK_MOD_ENV => (CordDest::FilterEnvAttack, DEPTH_TIME_CENTS, false),
        _ => return None,
    })
}

fn encode_modulator(source: CordSource, dest: CordDest, percent: f64) -> Option<Modulator> {
    let raw = mod_source_raw(source)?;
    let (gen, full, invert) = mod_dest(dest)?;
    let percent = if invert { -percent } else { percent };
    Some(Modulator {
        source: raw,
        dest: gen,
        amount: depth_amount(percent, full),
        amount_source: 0,
        transform: 0,
    })
}

fn decode_modulator(m: &Modulator) -> Option<(CordSource, CordDest, f64)> {
    if m.transform != 0 || m.amount_source != 0 {
        return None;
    }
    let source = mod_source_from_raw(m.source)?;
    let (dest, full, invert) = mod_dest_from_gen(m.dest)?;
    let mut percent = depth_percent(m.amount, full);
    if invert {
        percent = -percent;
    }
    Some((source, dest, percent))
}

fn zone_from_voice(
    voice: &Voice,
    preset_name: &str,
    remap: &[Option<u16>],
    options: &Options,
    diag: &mut Diagnostics,
) -> Option<Sf2Zone> {
    let sample_id = match remap.get(voice.sample_index as usize).copied().flatten() {
        Some(id) => id,
        None => {
            // the sample itself was already diagnosed; the voice goes with it
            log::debug!(
                "dropping voice in `{preset_name}`: sample {} was skipped",
                voice.sample_index
            );
            return None;
        }
    };
    let mut gens = vec![
        Generator::range(Gen::KEY_RANGE, voice.key_low, voice.key_high),
        Generator::range(Gen::VEL_RANGE, voice.vel_low, voice.vel_high),
        Generator::new(Gen::OVERRIDING_ROOT_KEY, voice.original_key as i16),
        Generator::new(Gen::INITIAL_ATTENUATION, db_atten_to_cb(voice.volume as f64)),
        Generator::new(Gen::PAN, pan_to_permille(voice.pan)),
        // the destination has a single coarse knob; transpose folds into it
        Generator::new(
            Gen::COARSE_TUNE,
            voice.coarse_tune as i16 + voice.transpose as i16,
        ),
        Generator::new(Gen::FINE_TUNE, voice.fine_tune_cents.round() as i16),
        Generator::new(Gen::INITIAL_FILTER_FC, hz_to_abs_cents(voice.filter_frequency_hz)),
        Generator::new(
            Gen::INITIAL_FILTER_Q,
            (voice.filter_resonance_percent.clamp(0.0, 100.0) * Q_FULL_CB / 100.0).round()
                as i16,
        ),
        Generator::new(
            Gen::CHORUS_SEND,
            (voice.chorus_amount_percent.clamp(0.0, 100.0) * 10.0).round() as i16,
        ),
        Generator::new(Gen::DELAY_VOL_ENV, secs_to_timecents(voice.amp_env.delay_secs)),
        Generator::new(Gen::ATTACK_VOL_ENV, secs_to_timecents(voice.amp_env.attack_secs)),
        Generator::new(Gen::HOLD_VOL_ENV, secs_to_timecents(voice.amp_env.hold_secs)),
        Generator::new(Gen::DECAY_VOL_ENV, secs_to_timecents(voice.amp_env.decay_secs)),
        Generator::new(Gen::SUSTAIN_VOL_ENV, db_atten_to_cb(voice.amp_env.sustain)),
        Generator::new(Gen::RELEASE_VOL_ENV, secs_to_timecents(voice.amp_env.release_secs)),
        Generator::new(Gen::DELAY_MOD_ENV, secs_to_timecents(voice.filter_env.delay_secs)),
        Generator::new(Gen::ATTACK_MOD_ENV, secs_to_timecents(voice.filter_env.attack_secs)),
        Generator::new(Gen::HOLD_MOD_ENV, secs_to_timecents(voice.filter_env.hold_secs)),
        Generator::new(Gen::DECAY_MOD_ENV, secs_to_timecents(voice.filter_env.decay_secs)),
        Generator::new(
            Gen::SUSTAIN_MOD_ENV,
            ((100.0 - voice.filter_env.sustain.clamp(0.0, 100.0)) * 10.0).round() as i16,
        ),
        Generator::new(
            Gen::RELEASE_MOD_ENV,
            secs_to_timecents(voice.filter_env.release_secs),
        ),
        Generator::new(Gen::FREQ_MOD_LFO, hz_to_abs_cents(voice.lfo1.rate_hz)),
        Generator::new(Gen::DELAY_MOD_LFO, secs_to_timecents(voice.lfo1.delay_secs)),
    ];
    if options.extended_data {
        gens.push(Generator::new(
            Gen::EXT_CHORUS_WIDTH,
            (voice.chorus_width_percent.clamp(0.0, 100.0) * 10.0).round() as i16,
        ));
        gens.push(Generator::new(Gen::EXT_LFO1_SHAPE, voice.lfo1.shape.code() as i16));
        gens.push(Generator::new(
            Gen::EXT_LFO1_KEY_SYNC,
            voice.lfo1.key_sync as i16,
        ));
    }

    let mut mods = Vec::new();
    for (source, dest, percent) in voice.cords.iter() {
        // a zero amount is "off", never an entry
        if percent == 0.0 {
            continue;
        }
        let handled = match source {
            CordSource::Lfo1PolarityCenter => match dest {
                // Vibrato folds onto the same pitch depth generator as Pitch,
                // so it decodes back under the Pitch key. Canonicalization,
                // like the single-zone multisample collapse.
                CordDest::Pitch | CordDest::Vibrato => {
                    gens.push(Generator::new(
                        Gen::MOD_LFO_TO_PITCH,
                        depth_amount(percent, DEPTH_PITCH_CENTS),
                    ));
                    true
                }
                CordDest::FilterFrequency => {
                    gens.push(Generator::new(
                        Gen::MOD_LFO_TO_FILTER_FC,
                        depth_amount(percent, DEPTH_FILTER_CENTS),
                    ));
                    true
                }
                CordDest::AmpVolume => {
                    gens.push(Generator::new(
                        Gen::MOD_LFO_TO_VOLUME,
                        depth_amount(percent, DEPTH_VOLUME_CB),
                    ));
                    true
                }
                _ => false,
            },
            CordSource::FilterEnvPolarityPositive => match dest {
                CordDest::FilterFrequency => {
                    gens.push(Generator::new(
                        Gen::MOD_ENV_TO_FILTER_FC,
                        depth_amount(percent, DEPTH_FILTER_CENTS),
                    ));
                    true
                }
                CordDest::Pitch => {
                    gens.push(Generator::new(
                        Gen::MOD_ENV_TO_PITCH,
                        depth_amount(percent, DEPTH_PITCH_CENTS),
                    ));
                    true
                }
                _ => false,
            },
            _ => match encode_modulator(source, dest, percent) {
                Some(m) => {
                    mods.push(m);
                    true
                }
                None => false,
            },
        };
        if !handled {
            // losing one routing beats silently misrouting it
            diag.report(Diagnostic::UnmappableRouting {
                source: format!("{source:?}"),
                dest: format!("{dest:?}"),
            });
        }
    }

    // loop flags live on the bank sample; the caller patches the real mode in
    gens.push(Generator::new(Gen::SAMPLE_MODES, 0));
    gens.push(Generator::new(Gen::SAMPLE_ID, sample_id as i16));
    Some(Sf2Zone {
        generators: gens,
        modulators: mods,
    })
}

/// Maps a Soundbank onto the SoundFont2 object model. Stereo samples and
/// whitelisted-out routings are diagnosed and dropped; everything else
/// converts.
pub fn font_from_bank(bank: &Soundbank, options: &Options, diag: &mut Diagnostics) -> Sf2Font {
    let mut samples = Vec::with_capacity(bank.samples.len());
    let mut remap = Vec::with_capacity(bank.samples.len());
    for sample in &bank.samples {
        if sample.channels != 1 {
            diag.report(Diagnostic::UnsupportedSample {
                name: sample.name.display().into_owned(),
                reason: format!("{} channels", sample.channels),
            });
            remap.push(None);
            continue;
        }
        remap.push(Some(samples.len() as u16));
        samples.push(Sf2Sample {
            name: sample.name.display().into_owned(),
            frames: sample.frames.clone(),
            sample_rate: sample.sample_rate,
            original_key: 60,
            correction: 0,
            loop_start: sample.loop_start,
            loop_end: sample.loop_end,
            sample_type: SAMPLE_TYPE_MONO,
            link: 0,
        });
    }
    for sequence in &bank.sequences {
        diag.report(Diagnostic::DroppedSequence {
            name: sequence.name.display().into_owned(),
        });
    }

    let mut font = Sf2Font {
        name: bank.name.clone(),
        samples,
        ..Sf2Font::default()
    };
    for preset in &bank.presets {
        let name = preset.name.display().into_owned();
        let mut zones = Vec::with_capacity(preset.voices.len());
        for voice in &preset.voices {
            if let Some(mut zone) = zone_from_voice(voice, &name, &remap, options, diag) {
                // fix up the loop mode now that the sample is known good
                let sample = &bank.samples[voice.sample_index as usize];
                let mode = match (sample.looping, sample.loop_release) {
                    (false, _) => 0,
                    (true, false) => 1,
                    (true, true) => 3,
                };
                for g in &mut zone.generators {
                    if g.oper == Gen::SAMPLE_MODES {
                        g.amount = mode;
                    }
                }
                zones.push(zone);
            }
        }
        let inst_index = font.instruments.len() as i16;
        font.instruments.push(Sf2Instrument { name: name.clone(), zones });
        font.presets.push(Sf2Preset {
            name,
            program: preset.index % 128,
            bank: preset.index / 128,
            zones: vec![Sf2Zone {
                generators: vec![Generator::new(Gen::INSTRUMENT, inst_index)],
                modulators: Vec::new(),
            }],
        });
    }
    font
}

fn apply_generator(voice: &mut Voice, gen: Generator, options: &Options) {
    match gen.oper {
        Gen::KEY_RANGE => {
            let [low, high] = gen.amount.to_le_bytes();
            voice.key_low = low.min(127);
            voice.key_high = high.min(127);
        }
        Gen::VEL_RANGE => {
            let [low, high] = gen.amount.to_le_bytes();
            voice.vel_low = low.min(127);
            voice.vel_high = high.min(127);
        }
        Gen::OVERRIDING_ROOT_KEY => {
            if gen.amount >= 0 {
                voice.original_key = (gen.amount as u8).min(127);
            }
        }
        Gen::INITIAL_ATTENUATION => {
            voice.volume = cb_to_db_atten(gen.amount).round().clamp(-96.0, 10.0) as i8;
        }
        Gen::PAN => voice.pan = permille_to_pan(gen.amount),
        Gen::COARSE_TUNE => {
            voice.coarse_tune = gen.amount.clamp(-72, 72) as i8;
            voice.transpose = 0;
        }
        Gen::FINE_TUNE => voice.fine_tune_cents = gen.amount as f64,
        Gen::INITIAL_FILTER_FC => voice.filter_frequency_hz = abs_cents_to_hz(gen.amount),
        Gen::INITIAL_FILTER_Q => {
            voice.filter_resonance_percent = gen.amount.max(0) as f64 * 100.0 / Q_FULL_CB;
        }
        Gen::CHORUS_SEND => {
            voice.chorus_amount_percent = (gen.amount.max(0) as f64 / 10.0).min(100.0);
        }
        Gen::DELAY_VOL_ENV => voice.amp_env.delay_secs = timecents_to_secs(gen.amount),
        Gen::ATTACK_VOL_ENV => voice.amp_env.attack_secs = timecents_to_secs(gen.amount),
        Gen::HOLD_VOL_ENV => voice.amp_env.hold_secs = timecents_to_secs(gen.amount),
        Gen::DECAY_VOL_ENV => voice.amp_env.decay_secs = timecents_to_secs(gen.amount),
        Gen::SUSTAIN_VOL_ENV => voice.amp_env.sustain = cb_to_db_atten(gen.amount),
        Gen::RELEASE_VOL_ENV => voice.amp_env.release_secs = timecents_to_secs(gen.amount),
        Gen::DELAY_MOD_ENV => voice.filter_env.delay_secs = timecents_to_secs(gen.amount),
        Gen::ATTACK_MOD_ENV => voice.filter_env.attack_secs = timecents_to_secs(gen.amount),
        Gen::HOLD_MOD_ENV => voice.filter_env.hold_secs = timecents_to_secs(gen.amount),
        Gen::DECAY_MOD_ENV => voice.filter_env.decay_secs = timecents_to_secs(gen.amount),
        Gen::SUSTAIN_MOD_ENV => {
            voice.filter_env.sustain = 100.0 - (gen.amount.clamp(0, 1000) as f64 / 10.0);
        }
        Gen::RELEASE_MOD_ENV => voice.filter_env.release_secs = timecents_to_secs(gen.amount),
        Gen::FREQ_MOD_LFO => voice.lfo1.rate_hz = abs_cents_to_hz(gen.amount),
        Gen::DELAY_MOD_LFO => voice.lfo1.delay_secs = timecents_to_secs(gen.amount),
        Gen::EXT_CHORUS_WIDTH if options.extended_data => {
            voice.chorus_width_percent = (gen.amount.max(0) as f64 / 10.0).min(100.0);
        }
        Gen::EXT_LFO1_SHAPE if options.extended_data => {
            voice.lfo1.shape = LfoShape::from_code(gen.amount.clamp(0, 7) as u8);
        }
        Gen::EXT_LFO1_KEY_SYNC if options.extended_data => {
            voice.lfo1.key_sync = gen.amount != 0;
        }
        // depth generators and sample plumbing are handled by the caller
        _ => {}
    }
}

fn apply_depth_generator(voice: &mut Voice, gen: Generator) -> bool {
    let (source, dest, full) = match gen.oper {
        Gen::MOD_LFO_TO_PITCH => (
            CordSource::Lfo1PolarityCenter,
            CordDest::Pitch,
            DEPTH_PITCH_CENTS,
        ),
        Gen::MOD_LFO_TO_FILTER_FC => (
            CordSource::Lfo1PolarityCenter,
            CordDest::FilterFrequency,
            DEPTH_FILTER_CENTS,
        ),
        Gen::MOD_LFO_TO_VOLUME => (
            CordSource::Lfo1PolarityCenter,
            CordDest::AmpVolume,
            DEPTH_VOLUME_CB,
        ),
        Gen::MOD_ENV_TO_FILTER_FC => (
            CordSource::FilterEnvPolarityPositive,
            CordDest::FilterFrequency,
            DEPTH_FILTER_CENTS,
        ),
        Gen::MOD_ENV_TO_PITCH => (
            CordSource::FilterEnvPolarityPositive,
            CordDest::Pitch,
            DEPTH_PITCH_CENTS,
        ),
        _ => return false,
    };
    if gen.amount != 0 {
        voice.cords.set(source, dest, depth_percent(gen.amount, full));
    }
    true
}

/// Maps a SoundFont2 object model back to a Soundbank. Global zones supply
/// defaults for the zones that follow them, matching the format's layering.
pub fn bank_from_font(font: &Sf2Font, options: &Options, diag: &mut Diagnostics) -> Soundbank {
    let mut bank = Soundbank {
        name: font.name.clone(),
        ..Soundbank::default()
    };

    let mut remap = Vec::with_capacity(font.samples.len());
    for sample in &font.samples {
        if sample.sample_type != SAMPLE_TYPE_MONO {
            diag.report(Diagnostic::UnsupportedSample {
                name: sample.name.clone(),
                reason: format!("sample link type {}", sample.sample_type),
            });
            remap.push(None);
            continue;
        }
        remap.push(Some(bank.samples.len() as u16));
        bank.samples.push(Sample {
            name: BankName::new(&sample.name),
            frames: sample.frames.clone(),
            channels: 1,
            sample_rate: sample.sample_rate,
            looping: false,
            loop_release: false,
            loop_start: sample.loop_start,
            loop_end: sample.loop_end,
        });
    }

    for preset in &font.presets {
        let mut voices = Vec::new();
        let mut preset_global: Vec<Generator> = Vec::new();
        for pzone in &preset.zones {
            let inst = match pzone.generator(Gen::INSTRUMENT) {
                Some(i) => match font.instruments.get(i as usize) {
                    Some(inst) => inst,
                    None => continue,
                },
                None => {
                    // global preset zone
                    preset_global = pzone.generators.clone();
                    continue;
                }
            };
            let mut inst_global: Option<&Sf2Zone> = None;
            for zone in &inst.zones {
                if zone.is_global(Gen::SAMPLE_ID) {
                    inst_global = Some(zone);
                    continue;
                }
                let mut voice = Voice::default();
                for &g in &preset_global {
                    apply_generator(&mut voice, g, options);
                }
                for &g in pzone
                    .generators
                    .iter()
                    .filter(|g| g.oper != Gen::INSTRUMENT)
                {
                    apply_generator(&mut voice, g, options);
                }
                let mut root_key = None;
                let mut mode = 0i16;
                let mut sample_id = None;
                let globals = inst_global.map(|z| z.generators.as_slice()).unwrap_or(&[]);
                for &g in globals.iter().chain(&zone.generators) {
                    match g.oper {
                        Gen::SAMPLE_ID => sample_id = Some(g.amount as u16),
                        Gen::SAMPLE_MODES => mode = g.amount,
                        Gen::OVERRIDING_ROOT_KEY if g.amount >= 0 => {
                            root_key = Some((g.amount as u8).min(127));
                        }
                        _ => {
                            if !apply_depth_generator(&mut voice, g) {
                                apply_generator(&mut voice, g, options);
                            }
                        }
                    }
                }
                let sample_id = match sample_id {
                    Some(id) => id,
                    None => continue,
                };
                let (sf2_sample, mapped) = match (
                    font.samples.get(sample_id as usize),
                    remap.get(sample_id as usize).copied().flatten(),
                ) {
                    (Some(s), Some(m)) => (s, m),
                    _ => continue, // skipped or dangling sample takes its voices with it
                };
                voice.sample_index = mapped;
                voice.original_key = root_key.unwrap_or(sf2_sample.original_key.min(127));

                let mod_globals = inst_global.map(|z| z.modulators.as_slice()).unwrap_or(&[]);
                for m in mod_globals.iter().chain(&zone.modulators) {
                    if m.amount == 0 {
                        continue;
                    }
                    match decode_modulator(m) {
                        Some((source, dest, percent)) => {
                            voice.cords.set(source, dest, percent);
                        }
                        None => diag.report(Diagnostic::UnmappableRouting {
                            source: format!("modulator source 0x{:x}", m.source),
                            dest: format!("generator {}", m.dest),
                        }),
                    }
                }

                // loop state is zone-level in SF2 but sample-level here
                if mode == 1 || mode == 3 {
                    let s = &mut bank.samples[mapped as usize];
                    s.looping = true;
                    s.loop_release = mode == 3;
                }
                voices.push(voice);
            }
        }
        bank.presets.push(Preset {
            index: preset.bank * 128 + preset.program,
            name: BankName::new(&preset.name),
            voices,
        });
    }
    bank
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options::default()
    }

    fn one_sample_bank(voice: Voice) -> Soundbank {
        Soundbank {
            name: "test".into(),
            presets: vec![Preset {
                index: 0,
                name: BankName::new("P0"),
                voices: vec![voice],
            }],
            samples: vec![Sample {
                name: BankName::new("s0"),
                frames: vec![1, 2, 3, 4],
                channels: 1,
                sample_rate: 44100,
                ..Sample::default()
            }],
            sequences: Vec::new(),
            default_preset: None,
        }
    }

    fn control_gens(zone: &Sf2Zone) -> Vec<u16> {
        zone.generators
            .iter()
            .map(|g| g.oper)
            .filter(|o| {
                matches!(
                    *o,
                    Gen::MOD_LFO_TO_PITCH
                        | Gen::MOD_LFO_TO_FILTER_FC
                        | Gen::MOD_LFO_TO_VOLUME
                        | Gen::MOD_ENV_TO_FILTER_FC
                        | Gen::MOD_ENV_TO_PITCH
                )
            })
            .collect()
    }

    #[test]
    fn all_off_cords_produce_no_control_slots() {
        let bank = one_sample_bank(Voice::default());
        let mut diag = Diagnostics::default();
        let font = font_from_bank(&bank, &options(), &mut diag);
        let zone = &font.instruments[0].zones[0];
        assert!(zone.modulators.is_empty());
        assert!(control_gens(zone).is_empty());
        assert!(diag.is_empty());
    }

    #[test]
    fn whitelisted_cords_roundtrip() {
        let pairs = [
            (CordSource::PitchWheel, CordDest::Pitch),
            (CordSource::ModWheel, CordDest::Vibrato),
            (CordSource::ChannelPressure, CordDest::FilterFrequency),
            (CordSource::Pedal, CordDest::FilterResonance),
            (CordSource::MidiA, CordDest::AmpVolume),
            (CordSource::MidiB, CordDest::AmpPan),
            (CordSource::Footswitch1, CordDest::AmpEnvAttack),
            (CordSource::KeyPolarityPositive, CordDest::FilterEnvAttack),
            (CordSource::KeyPolarityCenter, CordDest::Pitch),
            (CordSource::VelocityPolarityPositive, CordDest::FilterFrequency),
            (CordSource::VelocityPolarityCenter, CordDest::AmpPan),
            (CordSource::VelocityPolarityLess, CordDest::AmpVolume),
        ];
        for (source, dest) in pairs {
            let mut voice = Voice::default();
            voice.cords.set(source, dest, 50.0);
            let bank = one_sample_bank(voice);
            let mut diag = Diagnostics::default();
            let font = font_from_bank(&bank, &options(), &mut diag);
            assert!(diag.is_empty(), "{source:?}->{dest:?} diagnosed");
            let round = bank_from_font(&font, &options(), &mut diag);
            assert!(diag.is_empty());
            let cords = &round.presets[0].voices[0].cords;
            assert_eq!(cords.len(), 1, "{source:?}->{dest:?} lost");
            let amount = cords.get(source, dest).unwrap();
            assert!((amount - 50.0).abs() < 1.0, "{source:?}->{dest:?}: {amount}");
            assert!(amount != 0.0);
        }
    }

    #[test]
    fn lfo_and_filter_env_cords_become_depth_generators() {
        let mut voice = Voice::default();
        voice.cords.set(CordSource::Lfo1PolarityCenter, CordDest::Pitch, 25.0);
        voice
            .cords
            .set(CordSource::FilterEnvPolarityPositive, CordDest::FilterFrequency, -50.0);
        let bank = one_sample_bank(voice);
        let mut diag = Diagnostics::default();
        let font = font_from_bank(&bank, &options(), &mut diag);
        let zone = &font.instruments[0].zones[0];
        assert!(zone.modulators.is_empty());
        assert_eq!(zone.generator(Gen::MOD_LFO_TO_PITCH), Some(300));
        assert_eq!(zone.generator(Gen::MOD_ENV_TO_FILTER_FC), Some(-4800));

        let round = bank_from_font(&font, &options(), &mut diag);
        let cords = &round.presets[0].voices[0].cords;
        assert_eq!(cords.len(), 2);
        assert!(
            (cords.get(CordSource::Lfo1PolarityCenter, CordDest::Pitch).unwrap() - 25.0).abs()
                < 0.1
        );
    }

    #[test]
    fn lfo_vibrato_cord_canonicalizes_to_pitch() {
        let mut voice = Voice::default();
        voice.cords.set(CordSource::Lfo1PolarityCenter, CordDest::Vibrato, 40.0);
        let bank = one_sample_bank(voice);
        let mut diag = Diagnostics::default();
        let font = font_from_bank(&bank, &options(), &mut diag);
        let zone = &font.instruments[0].zones[0];
        assert_eq!(zone.generator(Gen::MOD_LFO_TO_PITCH), Some(480));

        // comes back under the Pitch key with the amount intact
        let round = bank_from_font(&font, &options(), &mut diag);
        assert!(diag.is_empty());
        let cords = &round.presets[0].voices[0].cords;
        assert_eq!(cords.len(), 1);
        assert!(cords.get(CordSource::Lfo1PolarityCenter, CordDest::Vibrato).is_none());
        let amount = cords.get(CordSource::Lfo1PolarityCenter, CordDest::Pitch).unwrap();
        assert!((amount - 40.0).abs() < 0.1);
    }

    #[test]
    fn unwhitelisted_routing_is_dropped_with_diagnostic() {
        let mut voice = Voice::default();
        voice.cords.set(CordSource::KeyPolarityPositive, CordDest::KeySustain, 75.0);
        let bank = one_sample_bank(voice);
        let mut diag = Diagnostics::default();
        let font = font_from_bank(&bank, &options(), &mut diag);
        let zone = &font.instruments[0].zones[0];
        assert!(zone.modulators.is_empty());
        assert!(control_gens(zone).is_empty());
        assert_eq!(diag.entries().len(), 1);
        assert!(matches!(
            &diag.entries()[0],
            Diagnostic::UnmappableRouting { .. }
        ));
    }

    #[test]
    fn stereo_sample_is_skipped_with_its_voices() {
        let mut bank = one_sample_bank(Voice::default());
        bank.samples.push(Sample {
            name: BankName::new("wide"),
            frames: vec![0; 8],
            channels: 2,
            sample_rate: 44100,
            ..Sample::default()
        });
        let mut voice = Voice::default();
        voice.sample_index = 1;
        bank.presets[0].voices.push(voice);
        let mut diag = Diagnostics::default();
        let font = font_from_bank(&bank, &options(), &mut diag);
        assert_eq!(font.samples.len(), 1);
        assert_eq!(font.instruments[0].zones.len(), 1);
        assert_eq!(diag.entries().len(), 1);
        assert!(matches!(
            &diag.entries()[0],
            Diagnostic::UnsupportedSample { reason, .. } if reason == "2 channels"
        ));
    }

    #[test]
    fn static_parameters_roundtrip_within_quantization() {
        let voice = Voice {
            key_low: 24,
            key_high: 84,
            vel_low: 10,
            vel_high: 100,
            original_key: 48,
            volume: -12,
            pan: -32,
            fine_tune_cents: 25.0,
            coarse_tune: 3,
            filter_frequency_hz: 1000.0,
            filter_resonance_percent: 50.0,
            chorus_amount_percent: 20.0,
            amp_env: Envelope {
                attack_secs: 0.25,
                decay_secs: 1.0,
                release_secs: 2.0,
                sustain: -6.0,
                ..Envelope::default()
            },
            filter_env: Envelope {
                attack_secs: 0.1,
                sustain: 75.0,
                ..Envelope::default()
            },
            ..Voice::default()
        };
        let bank = one_sample_bank(voice.clone());
        let mut diag = Diagnostics::default();
        let font = font_from_bank(&bank, &options(), &mut diag);
        let round = bank_from_font(&font, &options(), &mut diag);
        let v = &round.presets[0].voices[0];
        assert_eq!((v.key_low, v.key_high, v.vel_low, v.vel_high), (24, 84, 10, 100));
        assert_eq!(v.original_key, 48);
        assert_eq!(v.volume, -12);
        assert_eq!(v.pan, -32);
        assert_eq!(v.fine_tune_cents, 25.0);
        assert_eq!(v.coarse_tune, 3);
        assert!((v.filter_frequency_hz - 1000.0).abs() < 1.0);
        assert!((v.filter_resonance_percent - 50.0).abs() < 0.2);
        assert!((v.amp_env.attack_secs - 0.25).abs() < 0.001);
        assert_eq!(v.amp_env.sustain, -6.0);
        assert!((v.filter_env.sustain - 75.0).abs() < 0.1);
        assert_eq!(v.amp_env.delay_secs, 0.0);
    }

    #[test]
    fn extended_generators_are_gated_by_option() {
        let mut voice = Voice::default();
        voice.chorus_width_percent = 40.0;
        voice.lfo1.shape = LfoShape::Square;
        voice.lfo1.key_sync = true;
        let bank = one_sample_bank(voice);
        let mut diag = Diagnostics::default();

        let plain = font_from_bank(&bank, &options(), &mut diag);
        assert_eq!(plain.instruments[0].zones[0].generator(Gen::EXT_CHORUS_WIDTH), None);

        let ext = Options {
            extended_data: true,
            ..Options::default()
        };
        let font = font_from_bank(&bank, &ext, &mut diag);
        let zone = &font.instruments[0].zones[0];
        assert_eq!(zone.generator(Gen::EXT_CHORUS_WIDTH), Some(400));
        assert_eq!(zone.generator(Gen::EXT_LFO1_SHAPE), Some(LfoShape::Square.code() as i16));
        let round = bank_from_font(&font, &ext, &mut diag);
        let v = &round.presets[0].voices[0];
        assert_eq!(v.lfo1.shape, LfoShape::Square);
        assert!(v.lfo1.key_sync);
        assert_eq!(v.chorus_width_percent, 40.0);
    }
}
