use arrayvec::ArrayVec;
use indexmap::IndexMap;

/// Fixed 16-byte space-padded name field shared by presets, samples and
/// sequences. Always stored at full width so encode is byte-stable; the inner
/// buffer stays private so no shorter value can be built.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BankName(ArrayVec<u8, 16>);

impl BankName {
    pub fn new(name: &str) -> Self {
        let mut v = ArrayVec::new();
        for &b in name.as_bytes().iter().take(16) {
            v.push(b);
        }
        while !v.is_full() {
            v.push(b' ');
        }
        Self(v)
    }
    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(ArrayVec::from(bytes))
    }
    /// The full-width wire form, padded even if the buffer were ever short.
    pub fn to_array(&self) -> [u8; 16] {
        let mut out = [b' '; 16];
        out[..self.0.len()].copy_from_slice(&self.0);
        out
    }
    #[inline]
    pub fn display(&self) -> std::borrow::Cow<str> {
        match String::from_utf8_lossy(&self.0) {
            std::borrow::Cow::Borrowed(s) => s.trim_end().into(),
            std::borrow::Cow::Owned(s) => s.trim_end().to_owned().into(),
        }
    }
}

impl Default for BankName {
    #[inline]
    fn default() -> Self {
        Self::new("")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Soundbank {
    pub name: String,
    pub presets: Vec<Preset>,
    pub samples: Vec<Sample>,
    pub sequences: Vec<Sequence>,
    /// `None` is the container's 255 sentinel ("no preset bound").
    pub default_preset: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Preset {
    /// Format-native identity, not necessarily the position in the bank.
    pub index: u16,
    pub name: BankName,
    pub voices: Vec<Voice>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Voice {
    /// Inclusive MIDI key range, 0-127.
    pub key_low: u8,
    pub key_high: u8,
    /// Inclusive velocity range, 0-127.
    pub vel_low: u8,
    pub vel_high: u8,
    pub original_key: u8,
    /// 0-based into `Soundbank::samples`; the container's 1-based convention
    /// is translated at the codec boundary, never here.
    pub sample_index: u16,
    pub fine_tune_cents: f64,
    pub coarse_tune: i8,
    pub transpose: i8,
    /// Signed attenuation in dB.
    pub volume: i8,
    /// Signed, centered at 0.
    pub pan: i8,
    pub filter_frequency_hz: f64,
    pub filter_resonance_percent: f64,
    pub chorus_amount_percent: f64,
    pub chorus_width_percent: f64,
    pub lfo1: Lfo,
    pub amp_env: Envelope,
    pub filter_env: Envelope,
    pub cords: CordMap,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            key_low: 0,
            key_high: 127,
            vel_low: 0,
            vel_high: 127,
            original_key: 60,
            sample_index: 0,
            fine_tune_cents: 0.0,
            coarse_tune: 0,
            transpose: 0,
            volume: 0,
            pan: 0,
            filter_frequency_hz: 20000.0,
            filter_resonance_percent: 0.0,
            chorus_amount_percent: 0.0,
            chorus_width_percent: 0.0,
            lfo1: Lfo::default(),
            amp_env: Envelope::default(),
            filter_env: Envelope::default(),
            // Defaults stay empty: the conventional pitch-wheel and mod-wheel
            // routings are only present when a decoder actually read them.
            cords: CordMap::default(),
        }
    }
}

/// Five-segment envelope. `sustain` is dB attenuation on the amp envelope but
/// percent-of-excursion on the filter envelope; the two must not be conflated.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Envelope {
    pub delay_secs: f64,
    pub attack_secs: f64,
    pub hold_secs: f64,
    pub decay_secs: f64,
    pub release_secs: f64,
    pub sustain: f64,
}

impl Envelope {
    /// True when every field is numerically zero, the shape that the
    /// `filter_env_defaults` option substitutes for.
    pub fn is_zero(&self) -> bool {
        self.delay_secs == 0.0
            && self.attack_secs == 0.0
            && self.hold_secs == 0.0
            && self.decay_secs == 0.0
            && self.release_secs == 0.0
            && self.sustain == 0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lfo {
    pub rate_hz: f64,
    pub shape: LfoShape,
    pub delay_secs: f64,
    /// Phase reset on note-on.
    pub key_sync: bool,
}

impl Default for Lfo {
    fn default() -> Self {
        Self {
            rate_hz: 5.0,
            shape: LfoShape::Triangle,
            delay_secs: 0.0,
            key_sync: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LfoShape {
    #[default]
    Triangle,
    Sine,
    Sawtooth,
    Square,
    Pulse33,
    Pulse25,
    Pulse16,
    Random,
}

impl LfoShape {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Sine,
            2 => Self::Sawtooth,
            3 => Self::Square,
            4 => Self::Pulse33,
            5 => Self::Pulse25,
            6 => Self::Pulse16,
            7 => Self::Random,
            _ => Self::Triangle,
        }
    }
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Self::Triangle => 0,
            Self::Sine => 1,
            Self::Sawtooth => 2,
            Self::Square => 3,
            Self::Pulse33 => 4,
            Self::Pulse25 => 5,
            Self::Pulse16 => 6,
            Self::Random => 7,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CordSource {
    Off,
    KeyPolarityPositive,
    KeyPolarityCenter,
    VelocityPolarityPositive,
    VelocityPolarityCenter,
    VelocityPolarityLess,
    PitchWheel,
    ModWheel,
    ChannelPressure,
    Pedal,
    MidiA,
    MidiB,
    Footswitch1,
    FilterEnvPolarityPositive,
    Lfo1PolarityCenter,
}

impl CordSource {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Off,
            8 => Self::KeyPolarityPositive,
            9 => Self::KeyPolarityCenter,
            16 => Self::VelocityPolarityPositive,
            17 => Self::VelocityPolarityCenter,
            18 => Self::VelocityPolarityLess,
            40 => Self::PitchWheel,
            41 => Self::ModWheel,
            42 => Self::ChannelPressure,
            43 => Self::Pedal,
            44 => Self::MidiA,
            45 => Self::MidiB,
            56 => Self::Footswitch1,
            80 => Self::FilterEnvPolarityPositive,
            96 => Self::Lfo1PolarityCenter,
            _ => return None,
        })
    }
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::KeyPolarityPositive => 8,
            Self::KeyPolarityCenter => 9,
            Self::VelocityPolarityPositive => 16,
            Self::VelocityPolarityCenter => 17,
            Self::VelocityPolarityLess => 18,
            Self::PitchWheel => 40,
            Self::ModWheel => 41,
            Self::ChannelPressure => 42,
            Self::Pedal => 43,
            Self::MidiA => 44,
            Self::MidiB => 45,
            Self::Footswitch1 => 56,
            Self::FilterEnvPolarityPositive => 80,
            Self::Lfo1PolarityCenter => 96,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CordDest {
    Off,
    KeySustain,
    Vibrato,
    Pitch,
    FilterFrequency,
    FilterResonance,
    AmpVolume,
    AmpPan,
    AmpEnvAttack,
    FilterEnvAttack,
}

impl CordDest {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Off,
            8 => Self::KeySustain,
            48 => Self::Pitch,
            49 => Self::Vibrato,
            56 => Self::FilterFrequency,
            57 => Self::FilterResonance,
            64 => Self::AmpVolume,
            65 => Self::AmpPan,
            73 => Self::AmpEnvAttack,
            81 => Self::FilterEnvAttack,
            _ => return None,
        })
    }
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::KeySustain => 8,
            Self::Pitch => 48,
            Self::Vibrato => 49,
            Self::FilterFrequency => 56,
            Self::FilterResonance => 57,
            Self::AmpVolume => 64,
            Self::AmpPan => 65,
            Self::AmpEnvAttack => 73,
            Self::FilterEnvAttack => 81,
        }
    }
}

/// Number of realtime-control slots in a voice record.
pub const CORD_SLOTS: usize = 24;

/// Active realtime controls keyed by (source, destination), at most one per
/// pair. Insertion order is preserved so the fixed 24-slot array materialized
/// at the encode boundary is stable across decode/encode cycles; the wire
/// format's `Off` free slots are represented by absence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CordMap(IndexMap<(CordSource, CordDest), f64>);

impl CordMap {
    /// Inserts or replaces a routing. An `Off` endpoint or a zero amount is
    /// "no routing" and clears the pair instead. Returns false when all 24
    /// slots are taken and the pair is new.
    pub fn set(&mut self, source: CordSource, dest: CordDest, amount_percent: f64) -> bool {
        if source == CordSource::Off || dest == CordDest::Off || amount_percent == 0.0 {
            self.0.shift_remove(&(source, dest));
            return true;
        }
        if self.0.len() >= CORD_SLOTS && !self.0.contains_key(&(source, dest)) {
            return false;
        }
        self.0.insert((source, dest), amount_percent);
        true
    }
    #[inline]
    pub fn get(&self, source: CordSource, dest: CordDest) -> Option<f64> {
        self.0.get(&(source, dest)).copied()
    }
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (CordSource, CordDest, f64)> + '_ {
        self.0.iter().map(|(&(s, d), &a)| (s, d, a))
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

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    pub name: BankName,
    /// 16-bit PCM frames, interleaved when `channels == 2`.
    pub frames: Vec<i16>,
    /// 1 is the only supported value; 2 is recognized and skipped downstream.
    pub channels: u16,
    pub sample_rate: u32,
    pub looping: bool,
    /// Loop sustained only until key release.
    pub loop_release: bool,
    pub loop_start: u32,
    pub loop_end: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sequence {
    pub name: BankName,
    /// Opaque MIDI stream, never interpreted.
    pub data: Vec<u8>,
}
