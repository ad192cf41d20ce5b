use crate::{
    bank::*,
    convert::{Diagnostic, Diagnostics},
    convert_error, cursor, curves, invalid_data, nom_fail,
};
use binrw::{BinRead, BinWrite};
use nom::{
    bytes::complete::{tag, take},
    error::{context, ParseError, VerboseError},
    number::complete::{be_u16, be_u32},
};
use std::io::Cursor;

pub const TAG_FORM: &[u8; 4] = b"FORM";
pub const TAG_E4B: &[u8; 4] = b"E4B0";
pub const TAG_TOC: &[u8; 4] = b"TOC1";
pub const TAG_PRESET: &[u8; 4] = b"E4P1";
pub const TAG_SAMPLE: &[u8; 4] = b"E3S1";
pub const TAG_SEQUENCE: &[u8; 4] = b"E4s1";
pub const TAG_MASTER: &[u8; 4] = b"E4Ma";
pub const TAG_STARTUP: &[u8; 4] = b"EMSt";

const TOC_ENTRY_SIZE: usize = 12;
const PRESET_HEADER_SIZE: usize = 30;
/// Total voice record size without appended zones, including its own size word.
const VOICE_SIZE: usize = 284;
const ZONE_SIZE: usize = 22;
/// Fixed sample header, including the leading index word. The declared E3S1
/// chunk length covers the header *except* that word, so the frame count is
/// `(chunk_len - (SAMPLE_HEADER_SIZE - 2)) / 2` and the stored payload is two
/// bytes longer than the chunk claims.
const SAMPLE_HEADER_SIZE: usize = 184;
const STARTUP_DATA_SIZE: usize = 28;
/// Offset of the default-preset byte inside the startup chunk payload.
const STARTUP_PRESET_OFFSET: usize = 18;
const NO_PRESET: u8 = 255;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    struct SampleFlags: u32 {
        const LOOP = 0x0001_0000;
        const LOOP_RELEASE = 0x0002_0000;
        const STEREO = 0x0004_0000;
    }
}

#[derive(Clone, Debug)]
#[binrw::binrw]
#[brw(big)]
struct EnvRecord {
    delay: u8,
    attack: u8,
    hold: u8,
    decay: u8,
    release: u8,
    sustain: u8,
}

#[derive(Clone, Copy, Debug, Default)]
#[binrw::binrw]
#[brw(big)]
struct CordRecord {
    source: u8,
    dest: u8,
    #[brw(pad_after(1))]
    amount: i8,
}

#[derive(Clone, Debug)]
#[binrw::binrw]
#[brw(big)]
struct VoiceBody {
    key_low: u8,
    key_high: u8,
    vel_low: u8,
    vel_high: u8,
    #[brw(pad_after(1))]
    original_key: u8,
    sample_index: u16,
    fine_tune: u8,
    coarse_tune: i8,
    transpose: i8,
    volume: i8,
    pan: i8,
    filter_freq: u8,
    filter_res: u8,
    chorus_amount: u8,
    chorus_width: u8,
    lfo1_rate: u8,
    lfo1_shape: u8,
    lfo1_delay: u8,
    lfo1_key_sync: u8,
    amp_env: EnvRecord,
    filter_env: EnvRecord,
    #[brw(pad_after(153))]
    cords: [CordRecord; CORD_SLOTS],
}

#[derive(Clone, Debug)]
#[binrw::binrw]
#[brw(big)]
struct ZoneRecord {
    key_low: u8,
    key_high: u8,
    vel_low: u8,
    vel_high: u8,
    #[brw(pad_after(1))]
    original_key: u8,
    sample_index: u16,
    fine_tune: u8,
    volume: i8,
    #[brw(pad_after(11))]
    pan: i8,
}

#[derive(Clone, Debug)]
#[binrw::binrw]
#[brw(big)]
struct SampleHeader {
    name: [u8; 16],
    start: u32,
    end: u32,
    loop_start: u32,
    loop_end: u32,
    sample_rate: u32,
    #[brw(pad_after(142))]
    format: u32,
}

fn decode_envelope(env: &EnvRecord, sustain: f64) -> Envelope {
    use curves::EnvStage::*;
    Envelope {
        delay_secs: curves::env_secs_from_code(env.delay, Delay),
        attack_secs: curves::env_secs_from_code(env.attack, Attack),
        hold_secs: curves::env_secs_from_code(env.hold, Hold),
        decay_secs: curves::env_secs_from_code(env.decay, Decay),
        release_secs: curves::env_secs_from_code(env.release, Release),
        sustain,
    }
}

fn encode_envelope(env: &Envelope, sustain: u8) -> EnvRecord {
    use curves::EnvStage::*;
    EnvRecord {
        delay: curves::env_code_from_secs(env.delay_secs, Delay),
        attack: curves::env_code_from_secs(env.attack_secs, Attack),
        hold: curves::env_code_from_secs(env.hold_secs, Hold),
        decay: curves::env_code_from_secs(env.decay_secs, Decay),
        release: curves::env_code_from_secs(env.release_secs, Release),
        sustain,
    }
}

impl VoiceBody {
    fn to_voice(&self, diag: &mut Diagnostics) -> Voice {
        let mut cords = CordMap::default();
        for cord in &self.cords {
            if cord.source == 0 && cord.dest == 0 {
                continue; // free slot
            }
            let (source, dest) = match (
                CordSource::from_code(cord.source),
                CordDest::from_code(cord.dest),
            ) {
                (Some(s), Some(d)) => (s, d),
                _ => {
                    diag.report(Diagnostic::UnmappableRouting {
                        source: format!("code {}", cord.source),
                        dest: format!("code {}", cord.dest),
                    });
                    continue;
                }
            };
            cords.set(source, dest, curves::percent_from_code(cord.amount));
        }
        Voice {
            key_low: self.key_low.min(127),
            key_high: self.key_high.min(127),
            vel_low: self.vel_low.min(127),
            vel_high: self.vel_high.min(127),
            original_key: self.original_key.min(127),
            // wire convention is 1-based
            sample_index: self.sample_index.saturating_sub(1),
            fine_tune_cents: curves::fine_cents_from_code(self.fine_tune),
            coarse_tune: self.coarse_tune,
            transpose: self.transpose,
            volume: self.volume,
            pan: self.pan,
            filter_frequency_hz: curves::filter_hz_from_code(self.filter_freq),
            filter_resonance_percent: curves::percent_from_code(self.filter_res.min(127) as i8),
            chorus_amount_percent: curves::percent_from_code(self.chorus_amount.min(127) as i8),
            chorus_width_percent: curves::chorus_width_from_code(self.chorus_width),
            lfo1: Lfo {
                rate_hz: curves::lfo_rate_hz_from_code(self.lfo1_rate),
                shape: LfoShape::from_code(self.lfo1_shape),
                delay_secs: curves::lfo_delay_secs_from_code(self.lfo1_delay),
                key_sync: self.lfo1_key_sync != 0,
            },
            amp_env: decode_envelope(
                &self.amp_env,
                curves::amp_sustain_db_from_code(self.amp_env.sustain),
            ),
            filter_env: decode_envelope(
                &self.filter_env,
                curves::percent_from_code(self.filter_env.sustain.min(127) as i8),
            ),
            cords,
        }
    }

    fn from_voice(voice: &Voice) -> Self {
        let mut cords = [CordRecord::default(); CORD_SLOTS];
        for (slot, (source, dest, amount)) in cords.iter_mut().zip(voice.cords.iter()) {
            *slot = CordRecord {
                source: source.code(),
                dest: dest.code(),
                amount: curves::code_from_percent(amount),
            };
        }
        Self {
            key_low: voice.key_low,
            key_high: voice.key_high,
            vel_low: voice.vel_low,
            vel_high: voice.vel_high,
            original_key: voice.original_key,
            sample_index: voice.sample_index + 1,
            fine_tune: curves::fine_code_from_cents(voice.fine_tune_cents),
            coarse_tune: voice.coarse_tune,
            transpose: voice.transpose,
            volume: voice.volume,
            pan: voice.pan,
            filter_freq: curves::filter_code_from_hz(voice.filter_frequency_hz),
            filter_res: curves::code_from_percent(voice.filter_resonance_percent.max(0.0)) as u8,
            chorus_amount: curves::code_from_percent(voice.chorus_amount_percent.max(0.0)) as u8,
            chorus_width: curves::chorus_width_code(voice.chorus_width_percent),
            lfo1_rate: curves::lfo_rate_code_from_hz(voice.lfo1.rate_hz),
            lfo1_shape: voice.lfo1.shape.code(),
            lfo1_delay: curves::lfo_delay_code_from_secs(voice.lfo1.delay_secs),
            lfo1_key_sync: voice.lfo1.key_sync as u8,
            amp_env: encode_envelope(
                &voice.amp_env,
                curves::amp_sustain_code_from_db(voice.amp_env.sustain),
            ),
            filter_env: encode_envelope(
                &voice.filter_env,
                curves::code_from_percent(voice.filter_env.sustain.max(0.0)) as u8,
            ),
            cords,
        }
    }
}

/// A multi-zone sub-bound of 0 (low) or 127 (high) cannot be told apart from
/// "inherit the voice-level bound"; the format itself is ambiguous here. The
/// conservative reading below inherits; see the multisample test.
#[inline]
fn zone_bound(zone: u8, voice: u8, sentinel: u8) -> u8 {
    if zone == sentinel {
        voice
    } else {
        zone.min(127)
    }
}

fn parse_voices<'a, E: ParseError<&'a [u8]>>(
    mut data: &'a [u8],
    count: usize,
    diag: &mut Diagnostics,
) -> nom::IResult<&'a [u8], Vec<Voice>, E> {
    let mut voices = Vec::with_capacity(count);
    for _ in 0..count {
        let (_, total) = be_u16(data)?;
        let total = total as usize;
        if total < VOICE_SIZE || (total - VOICE_SIZE) % ZONE_SIZE != 0 {
            return Err(nom_fail(data));
        }
        let (d, record) = take(total)(data)?;
        data = d;
        let body = VoiceBody::read(&mut Cursor::new(&record[2..VOICE_SIZE]))
            .map_err(|_| nom_fail(record))?;
        let voice = body.to_voice(diag);
        let n_zones = (total - VOICE_SIZE) / ZONE_SIZE;
        if n_zones <= 1 {
            // with zero or one zone the voice-level range is authoritative
            voices.push(voice);
        } else {
            for i in 0..n_zones {
                let at = VOICE_SIZE + i * ZONE_SIZE;
                let zone = ZoneRecord::read(&mut Cursor::new(&record[at..at + ZONE_SIZE]))
                    .map_err(|_| nom_fail(record))?;
                let mut v = voice.clone();
                v.key_low = zone_bound(zone.key_low, voice.key_low, 0);
                v.key_high = zone_bound(zone.key_high, voice.key_high, 127);
                v.vel_low = zone_bound(zone.vel_low, voice.vel_low, 0);
                v.vel_high = zone_bound(zone.vel_high, voice.vel_high, 127);
                v.original_key = zone.original_key.min(127);
                v.sample_index = zone.sample_index.saturating_sub(1);
                v.fine_tune_cents = curves::fine_cents_from_code(zone.fine_tune);
                v.volume = zone.volume;
                v.pan = zone.pan;
                voices.push(v);
            }
        }
    }
    Ok((data, voices))
}

fn parse_preset<'a, E: ParseError<&'a [u8]>>(
    data: &'a [u8],
    diag: &mut Diagnostics,
) -> nom::IResult<&'a [u8], Preset, E> {
    let (d, index) = be_u16(data)?;
    let (d, name) = take(16usize)(d)?;
    let (d, voice_count) = be_u16(d)?;
    let (d, _reserved) = take(PRESET_HEADER_SIZE - 20)(d)?;
    let (d, voices) = parse_voices(d, voice_count as usize, diag)?;
    Ok((
        d,
        Preset {
            index,
            name: BankName::from_bytes(name.try_into().unwrap()),
            voices,
        },
    ))
}

fn parse_sample<'a, E: ParseError<&'a [u8]>>(
    data: &'a [u8],
    chunk_len: usize,
) -> nom::IResult<&'a [u8], (u16, Sample), E> {
    let (d, index) = be_u16(data)?;
    let (d, header) = take(SAMPLE_HEADER_SIZE - 2)(d)?;
    let header =
        SampleHeader::read(&mut Cursor::new(header)).map_err(|_| nom_fail::<E>(data))?;
    let n_bytes = chunk_len
        .checked_sub(SAMPLE_HEADER_SIZE - 2)
        .ok_or_else(|| nom_fail(data))?;
    let (d, pcm) = take(n_bytes & !1)(d)?;
    let mut frames = Vec::with_capacity(pcm.len() / 2);
    for s in pcm.chunks_exact(2) {
        frames.push(i16::from_be_bytes(s.try_into().unwrap()));
    }
    let flags = SampleFlags::from_bits_truncate(header.format);
    Ok((
        d,
        (
            index,
            Sample {
                name: BankName::from_bytes(header.name),
                frames,
                channels: if flags.contains(SampleFlags::STEREO) { 2 } else { 1 },
                sample_rate: header.sample_rate,
                looping: flags.contains(SampleFlags::LOOP),
                loop_release: flags.contains(SampleFlags::LOOP_RELEASE),
                loop_start: header.loop_start / 2,
                loop_end: header.loop_end / 2,
            },
        ),
    ))
}

fn parse_sequence<'a, E: ParseError<&'a [u8]>>(
    data: &'a [u8],
) -> nom::IResult<&'a [u8], Sequence, E> {
    let (d, _index) = be_u16(data)?;
    let (d, name) = take(16usize)(d)?;
    Ok((
        &[],
        Sequence {
            name: BankName::from_bytes(name.try_into().unwrap()),
            data: d.to_vec(),
        },
    ))
}

fn parse_bank<'a, E: ParseError<&'a [u8]>>(
    full: &'a [u8],
    diag: &mut Diagnostics,
) -> nom::IResult<&'a [u8], Soundbank, E> {
    let (data, _) = tag(TAG_FORM)(full)?;
    let (data, _total) = be_u32(data)?;
    let (data, _) = tag(TAG_E4B)(data)?;
    let (data, _) = tag(TAG_TOC)(data)?;
    let (data, toc_len) = be_u32(data)?;
    let toc_end = full.len() - data.len() + toc_len as usize;
    let (_, toc) = take(toc_len as usize)(data)?;

    let mut bank = Soundbank::default();
    // (wire index, sample) pairs; re-based to 0 afterwards
    let mut samples = Vec::new();
    // startup search starts where the TOC ends, so an empty TOC still works
    let mut end_max = toc_end;
    for entry in toc.chunks_exact(TOC_ENTRY_SIZE) {
        let toc_tag: [u8; 4] = entry[..4].try_into().unwrap();
        let (rest, stored_len) = be_u32(&entry[4..])?;
        let (_, offset) = be_u32(rest)?;
        let stored_len = stored_len as usize;
        let offset = offset as usize;

        // sample chunks store two bytes more than they declare
        let payload_len = match &toc_tag {
            t if t == TAG_SAMPLE => stored_len + 2,
            _ => stored_len,
        };
        let (_, head) = cursor::slice_at(full, offset, 8)?;
        let (_, payload) = cursor::slice_at(full, offset + 8, payload_len)?;
        end_max = end_max.max(offset + 8 + payload_len);
        if &head[..4] != toc_tag {
            return Err(nom_fail(head));
        }
        match &toc_tag {
            t if t == TAG_PRESET => {
                let preset = parse_preset(payload, diag)?.1;
                bank.presets.push(preset);
            }
            t if t == TAG_SAMPLE => {
                let (_, (index, sample)) = parse_sample(payload, stored_len)?;
                samples.push((index, sample));
            }
            t if t == TAG_SEQUENCE => {
                let sequence = parse_sequence(payload)?.1;
                bank.sequences.push(sequence);
            }
            t if t == TAG_MASTER => {} // housekeeping, nothing to model
            _ => {
                diag.report(Diagnostic::UnknownChunk { tag: toc_tag });
            }
        }
    }

    // wire order is not index order; place each sample at its declared slot
    samples.sort_by_key(|(index, _)| *index);
    for (index, sample) in samples {
        let slot = (index as usize).saturating_sub(1);
        if slot != bank.samples.len() {
            log::warn!("non-contiguous sample index {index}");
        }
        bank.samples.push(sample);
    }

    // optional trailing startup chunk; absence means "no preset bound"
    if let Ok((_, head)) = cursor::slice_at::<E>(full, end_max, 8 + STARTUP_DATA_SIZE) {
        if &head[..4] == TAG_STARTUP {
            let preset = head[8 + STARTUP_PRESET_OFFSET];
            if preset != NO_PRESET {
                bank.default_preset = Some(preset as u16);
            }
        }
    }

    Ok((&[], bank))
}

/// Decodes a whole E4B file held in memory. A malformed container aborts this
/// file with a FormatError; recoverable oddities accumulate in `diag`.
pub fn decode(data: &[u8], diag: &mut Diagnostics) -> std::io::Result<Soundbank> {
    let bank = context("E4B", |d| parse_bank::<VerboseError<_>>(d, diag))(data)
        .map_err(|e| invalid_data(convert_error(data, e)))?
        .1;
    Ok(bank)
}

fn write_voice(w: &mut cursor::Writer, voice: &Voice) {
    // encode emits exactly one zone-free record per voice; multisample
    // reconstruction is decode-only
    w.u16(VOICE_SIZE as u16);
    let body = VoiceBody::from_voice(voice);
    let mut buf = Cursor::new(Vec::with_capacity(VOICE_SIZE - 2));
    body.write(&mut buf).unwrap();
    w.bytes(&buf.into_inner());
}

fn write_preset(w: &mut cursor::Writer, preset: &Preset) {
    w.u16(preset.index);
    w.bytes(&preset.name.to_array());
    w.u16(preset.voices.len() as u16);
    w.bytes(&[0u8; PRESET_HEADER_SIZE - 20]);
    for voice in &preset.voices {
        write_voice(w, voice);
    }
}

fn write_sample(w: &mut cursor::Writer, index: u16, sample: &Sample) {
    let mut flags = SampleFlags::empty();
    flags.set(SampleFlags::LOOP, sample.looping);
    flags.set(SampleFlags::LOOP_RELEASE, sample.loop_release);
    flags.set(SampleFlags::STEREO, sample.channels == 2);
    let header = SampleHeader {
        name: sample.name.to_array(),
        start: 0,
        end: (sample.frames.len() * 2) as u32,
        loop_start: sample.loop_start * 2,
        loop_end: sample.loop_end * 2,
        sample_rate: sample.sample_rate,
        format: flags.bits(),
    };
    w.u16(index + 1);
    let mut buf = Cursor::new(Vec::with_capacity(SAMPLE_HEADER_SIZE - 2));
    header.write(&mut buf).unwrap();
    w.bytes(&buf.into_inner());
    for s in &sample.frames {
        w.i16(*s);
    }
}

fn write_startup(w: &mut cursor::Writer, default_preset: Option<u16>) {
    w.bytes(TAG_STARTUP);
    w.u32(STARTUP_DATA_SIZE as u32);
    let start = w.pos();
    w.u16(0);
    w.name16(b"Untitled MSetup");
    w.u8(default_preset.map(|p| p.min(254) as u8).unwrap_or(NO_PRESET));
    while w.pos() - start < STARTUP_DATA_SIZE {
        w.u8(0);
    }
}

/// Encodes a Soundbank as an E4B file. The bank's sample indices must be
/// resolvable; anything else is a caller bug surfaced as an error.
pub fn encode(bank: &Soundbank) -> std::io::Result<Vec<u8>> {
    let n_samples = bank.samples.len() as u16;
    for preset in &bank.presets {
        for voice in &preset.voices {
            if voice.sample_index >= n_samples {
                return Err(invalid_data(format!(
                    "preset {} references sample {} of {n_samples}",
                    preset.index, voice.sample_index
                )));
            }
        }
    }

    let mut w = cursor::Writer::new();
    w.bytes(TAG_FORM);
    let total = w.mark_u32();
    w.bytes(TAG_E4B);

    let n_entries = bank.presets.len() + bank.samples.len() + bank.sequences.len();
    w.bytes(TAG_TOC);
    w.u32((n_entries * TOC_ENTRY_SIZE) as u32);
    let mut entries = Vec::with_capacity(n_entries);
    let mut toc_entry = |w: &mut cursor::Writer, tag: &[u8; 4]| {
        w.bytes(tag);
        let len = w.mark_u32();
        let offset = w.mark_u32();
        entries.push((len, offset));
    };
    for _ in &bank.presets {
        toc_entry(&mut w, TAG_PRESET);
    }
    for _ in &bank.samples {
        toc_entry(&mut w, TAG_SAMPLE);
    }
    for _ in &bank.sequences {
        toc_entry(&mut w, TAG_SEQUENCE);
    }

    let mut entries = entries.into_iter();
    let mut chunk = |w: &mut cursor::Writer,
                     tag: &[u8; 4],
                     declared_adjust: usize,
                     f: &mut dyn FnMut(&mut cursor::Writer)| {
        let (len_mark, offset_mark) = entries.next().unwrap();
        let at = w.pos();
        w.patch_u32(offset_mark, at as u32);
        w.bytes(tag);
        let len_field = w.mark_u32();
        let start = w.pos();
        f(w);
        let declared = (w.pos() - start - declared_adjust) as u32;
        w.patch_u32(len_field, declared);
        w.patch_u32(len_mark, declared);
    };

    for preset in &bank.presets {
        chunk(&mut w, TAG_PRESET, 0, &mut |w| write_preset(w, preset));
    }
    for (index, sample) in bank.samples.iter().enumerate() {
        // the declared length omits the index word; see SAMPLE_HEADER_SIZE
        chunk(&mut w, TAG_SAMPLE, 2, &mut |w| {
            write_sample(w, index as u16, sample)
        });
    }
    for (index, sequence) in bank.sequences.iter().enumerate() {
        chunk(&mut w, TAG_SEQUENCE, 0, &mut |w| {
            w.u16(index as u16 + 1);
            w.bytes(&sequence.name.to_array());
            w.bytes(&sequence.data);
        });
    }

    write_startup(&mut w, bank.default_preset);
    let end = w.pos();
    w.patch_u32(total, (end - 8) as u32);
    Ok(w.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bank() -> Soundbank {
        let mut voice = Voice {
            key_low: 36,
            key_high: 96,
            vel_low: 0,
            vel_high: 127,
            original_key: 60,
            sample_index: 1,
            volume: -6,
            pan: 12,
            ..Voice::default()
        };
        voice.cords.set(CordSource::ModWheel, CordDest::Vibrato, 50.0);
        voice.cords.set(CordSource::PitchWheel, CordDest::Pitch, 100.0);
        let sample = Sample {
            name: BankName::new("snare"),
            frames: vec![0, 1000, -1000, 32767, -32768, 7],
            channels: 1,
            sample_rate: 44100,
            looping: true,
            loop_release: false,
            loop_start: 1,
            loop_end: 4,
            ..Sample::default()
        };
        Soundbank {
            name: String::new(),
            presets: vec![Preset {
                index: 0,
                name: BankName::new("Test Preset"),
                voices: vec![voice],
            }],
            samples: vec![Sample { name: BankName::new("kick"), ..sample.clone() }, sample],
            sequences: vec![Sequence {
                name: BankName::new("intro"),
                data: vec![0x90, 0x3c, 0x7f, 0x80, 0x3c, 0x00],
            }],
            default_preset: Some(0),
        }
    }

    #[test]
    fn encode_decode_encode_is_stable() {
        let bank = test_bank();
        let mut diag = Diagnostics::default();
        let bytes1 = encode(&bank).unwrap();
        let decoded1 = decode(&bytes1, &mut diag).unwrap();
        let bytes2 = encode(&decoded1).unwrap();
        assert_eq!(bytes1, bytes2);
        let decoded2 = decode(&bytes2, &mut diag).unwrap();
        assert_eq!(decoded1, decoded2);
        assert!(diag.is_empty());
    }

    #[test]
    fn decode_preserves_model_fields() {
        let bank = test_bank();
        let mut diag = Diagnostics::default();
        let decoded = decode(&encode(&bank).unwrap(), &mut diag).unwrap();
        assert_eq!(decoded.presets.len(), 1);
        assert_eq!(decoded.samples.len(), 2);
        assert_eq!(decoded.sequences, bank.sequences);
        assert_eq!(decoded.default_preset, Some(0));
        let voice = &decoded.presets[0].voices[0];
        let orig = &bank.presets[0].voices[0];
        assert_eq!(
            (voice.key_low, voice.key_high, voice.vel_low, voice.vel_high),
            (36, 96, 0, 127)
        );
        assert_eq!(voice.sample_index, 1);
        assert_eq!(voice.volume, -6);
        assert_eq!(voice.pan, 12);
        // curve-coded fields survive within one quantization step
        assert!((voice.filter_frequency_hz - orig.filter_frequency_hz).abs() < 80.0);
        assert!((voice.lfo1.rate_hz - orig.lfo1.rate_hz).abs() < 0.2);
        assert_eq!(
            voice.cords.get(CordSource::ModWheel, CordDest::Vibrato),
            Some(curves::percent_from_code(curves::code_from_percent(50.0)))
        );
        let sample = &decoded.samples[1];
        assert_eq!(sample.frames, bank.samples[1].frames);
        assert_eq!(sample.sample_rate, 44100);
        assert!(sample.looping && !sample.loop_release);
        assert_eq!((sample.loop_start, sample.loop_end), (1, 4));
    }

    #[test]
    fn missing_startup_chunk_means_no_default_preset() {
        let mut bank = test_bank();
        bank.default_preset = None;
        let bytes = encode(&bank).unwrap();
        let mut diag = Diagnostics::default();
        assert_eq!(decode(&bytes, &mut diag).unwrap().default_preset, None);

        // strip the trailing EMSt chunk entirely; decode still succeeds
        let mut bank = test_bank();
        bank.default_preset = Some(0);
        let mut bytes = encode(&bank).unwrap();
        bytes.truncate(bytes.len() - (8 + STARTUP_DATA_SIZE));
        assert_eq!(decode(&bytes, &mut diag).unwrap().default_preset, None);
    }

    #[test]
    fn empty_bank_keeps_its_default_preset() {
        // no presets, samples or sequences: the TOC is empty and the startup
        // chunk sits directly after it
        let bank = Soundbank { default_preset: Some(3), ..Soundbank::default() };
        let bytes = encode(&bank).unwrap();
        let mut diag = Diagnostics::default();
        let decoded = decode(&bytes, &mut diag).unwrap();
        assert_eq!(decoded.default_preset, Some(3));
        assert!(decoded.presets.is_empty() && decoded.samples.is_empty());
        assert!(diag.is_empty());
    }

    #[test]
    fn stereo_flag_marks_two_channels() {
        let mut bank = test_bank();
        bank.samples[0].channels = 2;
        let mut diag = Diagnostics::default();
        let decoded = decode(&encode(&bank).unwrap(), &mut diag).unwrap();
        assert_eq!(decoded.samples[0].channels, 2);
        assert_eq!(decoded.samples[1].channels, 1);
    }

    #[test]
    fn multisample_zones_expand_with_bound_inheritance() {
        // hand-build a two-zone voice; encode never produces one
        let mut w = cursor::Writer::new();
        w.bytes(TAG_FORM);
        let total = w.mark_u32();
        w.bytes(TAG_E4B);
        w.bytes(TAG_TOC);
        w.u32(TOC_ENTRY_SIZE as u32);
        w.bytes(TAG_PRESET);
        let len_mark = w.mark_u32();
        let offset_mark = w.mark_u32();

        let at = w.pos();
        w.patch_u32(offset_mark, at as u32);
        w.bytes(TAG_PRESET);
        let chunk_len = w.mark_u32();
        let start = w.pos();
        w.u16(7);
        w.name16(b"Multi");
        w.u16(1); // one voice record
        w.bytes(&[0u8; PRESET_HEADER_SIZE - 20]);
        w.u16((VOICE_SIZE + 2 * ZONE_SIZE) as u16);
        let voice = Voice {
            key_low: 40,
            key_high: 90,
            sample_index: 0,
            ..Voice::default()
        };
        let mut buf = Cursor::new(Vec::new());
        VoiceBody::from_voice(&voice).write(&mut buf).unwrap();
        w.bytes(&buf.into_inner());
        for (key_low, key_high, sample) in [(40u8, 60u8, 1u16), (61, 127, 2)] {
            let zone = ZoneRecord {
                key_low,
                key_high,
                vel_low: 0,
                vel_high: 127,
                original_key: 60,
                sample_index: sample,
                fine_tune: 64,
                volume: 0,
                pan: 0,
            };
            let mut buf = Cursor::new(Vec::new());
            zone.write(&mut buf).unwrap();
            w.bytes(&buf.into_inner());
        }
        let declared = (w.pos() - start) as u32;
        w.patch_u32(chunk_len, declared);
        w.patch_u32(len_mark, declared);
        let end = w.pos();
        w.patch_u32(total, (end - 8) as u32);

        let mut diag = Diagnostics::default();
        let bank = decode(&w.into_inner(), &mut diag).unwrap();
        let voices = &bank.presets[0].voices;
        assert_eq!(voices.len(), 2);
        assert_eq!((voices[0].key_low, voices[0].key_high), (40, 60));
        assert_eq!(voices[0].sample_index, 0);
        // a zone bound of 127 is indistinguishable from "inherit": the
        // voice-level bound (90) wins, which is the documented ambiguity
        assert_eq!((voices[1].key_low, voices[1].key_high), (61, 90));
        assert_eq!(voices[1].sample_index, 1);
    }

    #[test]
    fn unknown_toc_tag_is_diagnosed_not_fatal() {
        let bank = test_bank();
        let mut bytes = encode(&bank).unwrap();
        // first TOC entry tag starts right after FORM+len+E4B0+TOC1+len
        let toc = 20;
        bytes[toc..toc + 4].copy_from_slice(b"E4Xx");
        // the data chunk tag it points at must match
        let offset =
            u32::from_be_bytes(bytes[toc + 8..toc + 12].try_into().unwrap()) as usize;
        bytes[offset..offset + 4].copy_from_slice(b"E4Xx");
        let mut diag = Diagnostics::default();
        let decoded = decode(&bytes, &mut diag).unwrap();
        assert_eq!(decoded.presets.len(), 0);
        assert_eq!(decoded.samples.len(), 2);
        assert_eq!(diag.entries().len(), 1);
        assert!(matches!(
            diag.entries()[0],
            Diagnostic::UnknownChunk { tag: [b'E', b'4', b'X', b'x'] }
        ));
    }

    #[test]
    fn garbage_input_is_a_format_error() {
        let mut diag = Diagnostics::default();
        assert!(decode(b"RIFF not an e4b", &mut diag).is_err());
        assert!(decode(b"", &mut diag).is_err());
        // truncated mid-TOC
        let bytes = encode(&test_bank()).unwrap();
        assert!(decode(&bytes[..24], &mut diag).is_err());
    }
}
