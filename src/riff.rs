//! Built-in sfbk byte codec. Reads every hydra record the mapper can use and
//! writes a spec-shaped file back out; anything smarter (24-bit samples,
//! compressed banks) belongs in an alternative [`Sf2Codec`].

use crate::{
    convert_error, invalid_data, nom_fail,
    soundfont::{
        Generator, Modulator, Sf2Codec, Sf2Font, Sf2Instrument, Sf2Preset, Sf2Sample, Sf2Zone,
    },
};
use itertools::Itertools;
use nom::{
    bytes::complete::{tag, take},
    error::{context, ParseError, VerboseError},
    number::complete::le_u32,
};
use std::io;

pub struct RiffCodec;

const PHDR_SIZE: usize = 38;
const BAG_SIZE: usize = 4;
const GEN_SIZE: usize = 4;
const MOD_SIZE: usize = 10;
const INST_SIZE: usize = 22;
const SHDR_SIZE: usize = 46;
/// Zero words between samples in the smpl pool, required by the format.
const SAMPLE_GAP_WORDS: usize = 46;

#[inline]
fn align<const N: usize>(n: usize) -> usize {
    n.next_multiple_of(N)
}

fn riff_header<'a, E: ParseError<&'a [u8]>>(
    data: &'a [u8],
    form: &[u8; 4],
) -> nom::IResult<&'a [u8], &'a [u8], E> {
    let (rest, _) = tag(b"RIFF")(data)?;
    let (rest, size) = le_u32(rest)?;
    let (_, body) = take(size as usize)(rest)?;
    let (body, _) = tag(form)(body)?;
    Ok((&[], body))
}

fn riff_chunks<'a, E: ParseError<&'a [u8]>>(
    mut data: &'a [u8],
    mut f: impl FnMut([u8; 4], &'a [u8]) -> nom::IResult<&'a [u8], (), E>,
) -> nom::IResult<&'a [u8], (), E> {
    while !data.is_empty() {
        let (d, chunk_name) = take(4usize)(data)?;
        let (d, chunk_size) = le_u32(d)?;
        let (d, chunk) = take(align::<2>(chunk_size as usize))(d)?;
        let chunk = &chunk[..chunk_size as usize]; // trim any pad byte
        f(chunk_name.try_into().unwrap(), chunk)?;
        data = d;
    }
    Ok((data, ()))
}

#[derive(Default)]
struct RawChunks<'a> {
    name: Option<String>,
    smpl: Option<&'a [u8]>,
    phdr: Option<&'a [u8]>,
    pbag: Option<&'a [u8]>,
    pmod: Option<&'a [u8]>,
    pgen: Option<&'a [u8]>,
    inst: Option<&'a [u8]>,
    ibag: Option<&'a [u8]>,
    imod: Option<&'a [u8]>,
    igen: Option<&'a [u8]>,
    shdr: Option<&'a [u8]>,
}

fn parse_font<'a, E: ParseError<&'a [u8]>>(
    data: &'a [u8],
) -> nom::IResult<&'a [u8], RawChunks<'a>, E> {
    let (_, body) = riff_header(data, b"sfbk")?;
    let mut raw = RawChunks::default();
    riff_chunks(body, |chunk_name, chunk| {
        if chunk_name != *b"LIST" {
            return Ok((&[], ()));
        }
        let (chunk, list_name) = take(4usize)(chunk)?;
        match list_name {
            b"INFO" => {
                riff_chunks(chunk, |chunk_name, chunk| {
                    if chunk_name == *b"INAM" && raw.name.is_none() {
                        raw.name = Some(fixed_name(chunk));
                    }
                    Ok((&[], ()))
                })?;
            }
            b"sdta" => {
                riff_chunks(chunk, |chunk_name, chunk| {
                    if chunk_name == *b"smpl" {
                        raw.smpl.get_or_insert(chunk);
                    }
                    Ok((&[], ()))
                })?;
            }
            b"pdta" => {
                riff_chunks(chunk, |chunk_name, chunk| {
                    match &chunk_name {
                        b"phdr" => _ = raw.phdr.get_or_insert(chunk),
                        b"pbag" => _ = raw.pbag.get_or_insert(chunk),
                        b"pmod" => _ = raw.pmod.get_or_insert(chunk),
                        b"pgen" => _ = raw.pgen.get_or_insert(chunk),
                        b"inst" => _ = raw.inst.get_or_insert(chunk),
                        b"ibag" => _ = raw.ibag.get_or_insert(chunk),
                        b"imod" => _ = raw.imod.get_or_insert(chunk),
                        b"igen" => _ = raw.igen.get_or_insert(chunk),
                        b"shdr" => _ = raw.shdr.get_or_insert(chunk),
                        _ => {}
                    }
                    Ok((&[], ()))
                })?;
            }
            _ => {}
        }
        Ok((&[], ()))
    })?;
    // every hydra chunk is mandatory in a conforming file
    if [
        raw.phdr, raw.pbag, raw.pmod, raw.pgen, raw.inst, raw.ibag, raw.imod, raw.igen,
        raw.shdr, raw.smpl,
    ]
    .iter()
    .any(Option::is_none)
    {
        return Err(nom_fail(data));
    }
    Ok((&[], raw))
}

fn fixed_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

#[inline]
fn u16_at(rec: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(rec[at..at + 2].try_into().unwrap())
}

#[inline]
fn u32_at(rec: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(rec[at..at + 4].try_into().unwrap())
}

fn parse_bags(data: &[u8]) -> Vec<(usize, usize)> {
    data.chunks_exact(BAG_SIZE)
        .map(|c| (u16_at(c, 0) as usize, u16_at(c, 2) as usize))
        .collect()
}

fn parse_gens(data: &[u8]) -> Vec<Generator> {
    data.chunks_exact(GEN_SIZE)
        .map(|c| Generator::new(u16_at(c, 0), u16_at(c, 2) as i16))
        .collect()
}

fn parse_mods(data: &[u8]) -> Vec<Modulator> {
    data.chunks_exact(MOD_SIZE)
        .map(|c| Modulator {
            source: u16_at(c, 0),
            dest: u16_at(c, 2),
            amount: u16_at(c, 4) as i16,
            amount_source: u16_at(c, 6),
            transform: u16_at(c, 8),
        })
        .collect()
}

/// Materializes the zones of one header by walking its bag span; the final
/// gen/mod indices come from the bag one past the span.
fn zones_for(
    bags: &[(usize, usize)],
    gens: &[Generator],
    mods: &[Modulator],
    bag_start: usize,
    bag_end: usize,
) -> io::Result<Vec<Sf2Zone>> {
    let span = bags
        .get(bag_start..=bag_end)
        .ok_or_else(|| invalid_data("bag index out of range"))?;
    let mut zones = Vec::with_capacity(span.len().saturating_sub(1));
    for w in span.windows(2) {
        let ((g0, m0), (g1, m1)) = (w[0], w[1]);
        let generators = gens
            .get(g0..g1)
            .ok_or_else(|| invalid_data("generator index out of range"))?
            .to_vec();
        let modulators = mods
            .get(m0..m1)
            .ok_or_else(|| invalid_data("modulator index out of range"))?
            .to_vec();
        zones.push(Sf2Zone {
            generators,
            modulators,
        });
    }
    Ok(zones)
}

fn assemble(raw: RawChunks) -> io::Result<Sf2Font> {
    // parse_font already verified presence
    let pool: Vec<i16> = raw
        .smpl
        .unwrap_or_default()
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes(c.try_into().unwrap()))
        .collect();

    let mut font = Sf2Font {
        name: raw.name.unwrap_or_default(),
        ..Sf2Font::default()
    };

    let shdr: Vec<_> = raw.shdr.unwrap_or_default().chunks_exact(SHDR_SIZE).collect();
    for rec in shdr.iter().take(shdr.len().saturating_sub(1)) {
        let start = u32_at(rec, 20);
        let end = u32_at(rec, 24);
        let frames = pool
            .get(start as usize..end as usize)
            .ok_or_else(|| invalid_data("sample data out of range"))?
            .to_vec();
        font.samples.push(Sf2Sample {
            name: fixed_name(&rec[..20]),
            frames,
            loop_start: u32_at(rec, 28).saturating_sub(start),
            loop_end: u32_at(rec, 32).saturating_sub(start),
            sample_rate: u32_at(rec, 36),
            original_key: rec[40],
            correction: rec[41] as i8,
            link: u16_at(rec, 42),
            sample_type: u16_at(rec, 44),
        });
    }

    let ibags = parse_bags(raw.ibag.unwrap_or_default());
    let igens = parse_gens(raw.igen.unwrap_or_default());
    let imods = parse_mods(raw.imod.unwrap_or_default());
    let inst = raw.inst.unwrap_or_default().chunks_exact(INST_SIZE);
    for (rec, next) in inst.tuple_windows() {
        font.instruments.push(Sf2Instrument {
            name: fixed_name(&rec[..20]),
            zones: zones_for(
                &ibags,
                &igens,
                &imods,
                u16_at(rec, 20) as usize,
                u16_at(next, 20) as usize,
            )?,
        });
    }

    let pbags = parse_bags(raw.pbag.unwrap_or_default());
    let pgens = parse_gens(raw.pgen.unwrap_or_default());
    let pmods = parse_mods(raw.pmod.unwrap_or_default());
    let phdr = raw.phdr.unwrap_or_default().chunks_exact(PHDR_SIZE);
    for (rec, next) in phdr.tuple_windows() {
        font.presets.push(Sf2Preset {
            name: fixed_name(&rec[..20]),
            program: u16_at(rec, 20),
            bank: u16_at(rec, 22),
            zones: zones_for(
                &pbags,
                &pgens,
                &pmods,
                u16_at(rec, 24) as usize,
                u16_at(next, 24) as usize,
            )?,
        });
    }
    Ok(font)
}

fn write_name20(w: &mut dyn io::Write, name: &str) -> io::Result<()> {
    let name: String = name.chars().filter(char::is_ascii).take(19).collect();
    write!(w, "{name:\0<20}")
}

fn write_generator(w: &mut dyn io::Write, g: &Generator) -> io::Result<()> {
    w.write_all(&g.oper.to_le_bytes())?;
    w.write_all(&g.amount.to_le_bytes())
}

fn write_modulator(w: &mut dyn io::Write, m: &Modulator) -> io::Result<()> {
    w.write_all(&m.source.to_le_bytes())?;
    w.write_all(&m.dest.to_le_bytes())?;
    w.write_all(&m.amount.to_le_bytes())?;
    w.write_all(&m.amount_source.to_le_bytes())?;
    w.write_all(&m.transform.to_le_bytes())
}

impl Sf2Codec for RiffCodec {
    fn read(&self, data: &[u8]) -> io::Result<Sf2Font> {
        let raw = context("SoundFont2", parse_font::<VerboseError<_>>)(data)
            .map_err(|e| invalid_data(convert_error(data, e)))?
            .1;
        assemble(raw)
    }

    fn write(&self, font: &Sf2Font, w: &mut dyn io::Write) -> io::Result<()> {
        let pzones: usize = font.presets.iter().map(|p| p.zones.len()).sum();
        let pgens: usize = font
            .presets
            .iter()
            .flat_map(|p| &p.zones)
            .map(|z| z.generators.len())
            .sum();
        let pmods: usize = font
            .presets
            .iter()
            .flat_map(|p| &p.zones)
            .map(|z| z.modulators.len())
            .sum();
        let izones: usize = font.instruments.iter().map(|i| i.zones.len()).sum();
        let igens: usize = font
            .instruments
            .iter()
            .flat_map(|i| &i.zones)
            .map(|z| z.generators.len())
            .sum();
        let imods: usize = font
            .instruments
            .iter()
            .flat_map(|i| &i.zones)
            .map(|z| z.modulators.len())
            .sum();
        let smpl_words: usize = font
            .samples
            .iter()
            .map(|s| s.frames.len() + SAMPLE_GAP_WORDS)
            .sum();
        let smpl_size = (smpl_words * 2) as u32;

        let inam_size = align::<2>(font.name.chars().filter(char::is_ascii).take(255).count() + 1);
        let info_size = 4 + (8 + 4) + (8 + 8) + (8 + inam_size) as u32;
        let sdta_size = 4 + 8 + smpl_size;

        let phdr_size = ((font.presets.len() + 1) * PHDR_SIZE) as u32;
        let pbag_size = ((pzones + 1) * BAG_SIZE) as u32;
        let pmod_size = ((pmods + 1) * MOD_SIZE) as u32;
        let pgen_size = ((pgens + 1) * GEN_SIZE) as u32;
        let inst_size = ((font.instruments.len() + 1) * INST_SIZE) as u32;
        let ibag_size = ((izones + 1) * BAG_SIZE) as u32;
        let imod_size = ((imods + 1) * MOD_SIZE) as u32;
        let igen_size = ((igens + 1) * GEN_SIZE) as u32;
        let shdr_size = ((font.samples.len() + 1) * SHDR_SIZE) as u32;
        let pdta_size = 4
            + 9 * 8
            + phdr_size
            + pbag_size
            + pmod_size
            + pgen_size
            + inst_size
            + ibag_size
            + imod_size
            + igen_size
            + shdr_size;

        let riff_size = 4 + (8 + info_size) + (8 + sdta_size) + (8 + pdta_size);

        w.write_all(b"RIFF")?;
        w.write_all(&riff_size.to_le_bytes())?;
        w.write_all(b"sfbk")?;

        w.write_all(b"LIST")?;
        w.write_all(&info_size.to_le_bytes())?;
        w.write_all(b"INFO")?;
        w.write_all(b"ifil")?;
        w.write_all(&4u32.to_le_bytes())?;
        w.write_all(&[2, 0, 1, 0])?;
        w.write_all(b"isng")?;
        w.write_all(&8u32.to_le_bytes())?;
        w.write_all(b"EMU8000\0")?;
        w.write_all(b"INAM")?;
        w.write_all(&(inam_size as u32).to_le_bytes())?;
        let name: String = font.name.chars().filter(char::is_ascii).take(255).collect();
        w.write_all(name.as_bytes())?;
        for _ in name.len()..inam_size {
            w.write_all(&[0])?;
        }

        w.write_all(b"LIST")?;
        w.write_all(&sdta_size.to_le_bytes())?;
        w.write_all(b"sdta")?;
        w.write_all(b"smpl")?;
        w.write_all(&smpl_size.to_le_bytes())?;
        for sample in &font.samples {
            for s in &sample.frames {
                w.write_all(&s.to_le_bytes())?;
            }
            for _ in 0..SAMPLE_GAP_WORDS {
                w.write_all(&0i16.to_le_bytes())?;
            }
        }

        w.write_all(b"LIST")?;
        w.write_all(&pdta_size.to_le_bytes())?;
        w.write_all(b"pdta")?;

        w.write_all(b"phdr")?;
        w.write_all(&phdr_size.to_le_bytes())?;
        let mut bag_index = 0u16;
        for preset in &font.presets {
            write_name20(w, &preset.name)?;
            w.write_all(&preset.program.to_le_bytes())?;
            w.write_all(&preset.bank.to_le_bytes())?;
            w.write_all(&bag_index.to_le_bytes())?;
            w.write_all(&0u32.to_le_bytes())?;
            w.write_all(&0u32.to_le_bytes())?;
            w.write_all(&0u32.to_le_bytes())?;
            bag_index += preset.zones.len() as u16;
        }
        write_name20(w, "EOP")?;
        w.write_all(&0u16.to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?;
        w.write_all(&bag_index.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;

        w.write_all(b"pbag")?;
        w.write_all(&pbag_size.to_le_bytes())?;
        let mut gen_index = 0u16;
        let mut mod_index = 0u16;
        for zone in font.presets.iter().flat_map(|p| &p.zones) {
            w.write_all(&gen_index.to_le_bytes())?;
            w.write_all(&mod_index.to_le_bytes())?;
            gen_index += zone.generators.len() as u16;
            mod_index += zone.modulators.len() as u16;
        }
        w.write_all(&gen_index.to_le_bytes())?;
        w.write_all(&mod_index.to_le_bytes())?;

        w.write_all(b"pmod")?;
        w.write_all(&pmod_size.to_le_bytes())?;
        for m in font.presets.iter().flat_map(|p| &p.zones).flat_map(|z| &z.modulators) {
            write_modulator(w, m)?;
        }
        w.write_all(&[0u8; MOD_SIZE])?;

        w.write_all(b"pgen")?;
        w.write_all(&pgen_size.to_le_bytes())?;
        for g in font.presets.iter().flat_map(|p| &p.zones).flat_map(|z| &z.generators) {
            write_generator(w, g)?;
        }
        w.write_all(&[0u8; GEN_SIZE])?;

        w.write_all(b"inst")?;
        w.write_all(&inst_size.to_le_bytes())?;
        let mut bag_index = 0u16;
        for inst in &font.instruments {
            write_name20(w, &inst.name)?;
            w.write_all(&bag_index.to_le_bytes())?;
            bag_index += inst.zones.len() as u16;
        }
        write_name20(w, "EOI")?;
        w.write_all(&bag_index.to_le_bytes())?;

        w.write_all(b"ibag")?;
        w.write_all(&ibag_size.to_le_bytes())?;
        let mut gen_index = 0u16;
        let mut mod_index = 0u16;
        for zone in font.instruments.iter().flat_map(|i| &i.zones) {
            w.write_all(&gen_index.to_le_bytes())?;
            w.write_all(&mod_index.to_le_bytes())?;
            gen_index += zone.generators.len() as u16;
            mod_index += zone.modulators.len() as u16;
        }
        w.write_all(&gen_index.to_le_bytes())?;
        w.write_all(&mod_index.to_le_bytes())?;

        w.write_all(b"imod")?;
        w.write_all(&imod_size.to_le_bytes())?;
        for m in font
            .instruments
            .iter()
            .flat_map(|i| &i.zones)
            .flat_map(|z| &z.modulators)
        {
            write_modulator(w, m)?;
        }
        w.write_all(&[0u8; MOD_SIZE])?;

        w.write_all(b"igen")?;
        w.write_all(&igen_size.to_le_bytes())?;
        for g in font
            .instruments
            .iter()
            .flat_map(|i| &i.zones)
            .flat_map(|z| &z.generators)
        {
            write_generator(w, g)?;
        }
        w.write_all(&[0u8; GEN_SIZE])?;

        w.write_all(b"shdr")?;
        w.write_all(&shdr_size.to_le_bytes())?;
        let mut pos = 0u32;
        for sample in &font.samples {
            let end = pos + sample.frames.len() as u32;
            write_name20(w, &sample.name)?;
            w.write_all(&pos.to_le_bytes())?;
            w.write_all(&end.to_le_bytes())?;
            w.write_all(&(pos + sample.loop_start).to_le_bytes())?;
            w.write_all(&(pos + sample.loop_end).to_le_bytes())?;
            w.write_all(&sample.sample_rate.to_le_bytes())?;
            w.write_all(&sample.original_key.to_le_bytes())?;
            w.write_all(&sample.correction.to_le_bytes())?;
            w.write_all(&sample.link.to_le_bytes())?;
            w.write_all(&sample.sample_type.to_le_bytes())?;
            pos = end + SAMPLE_GAP_WORDS as u32;
        }
        write_name20(w, "EOS")?;
        w.write_all(&[0u8; SHDR_SIZE - 20])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundfont::{Gen, SAMPLE_TYPE_MONO};

    fn test_font() -> Sf2Font {
        Sf2Font {
            name: "Test Bank".into(),
            presets: vec![Sf2Preset {
                name: "Lead".into(),
                program: 3,
                bank: 1,
                zones: vec![Sf2Zone {
                    generators: vec![Generator::new(Gen::INSTRUMENT, 0)],
                    modulators: Vec::new(),
                }],
            }],
            instruments: vec![Sf2Instrument {
                name: "Lead".into(),
                zones: vec![Sf2Zone {
                    generators: vec![
                        Generator::range(Gen::KEY_RANGE, 10, 90),
                        Generator::new(Gen::PAN, -250),
                        Generator::new(Gen::SAMPLE_MODES, 1),
                        Generator::new(Gen::SAMPLE_ID, 0),
                    ],
                    modulators: vec![Modulator {
                        source: 0x0081,
                        dest: Gen::VIB_LFO_TO_PITCH,
                        amount: 600,
                        amount_source: 0,
                        transform: 0,
                    }],
                }],
            }],
            samples: vec![
                Sf2Sample {
                    name: "saw".into(),
                    frames: vec![0, 1000, -1000, 0, 500],
                    sample_rate: 44100,
                    original_key: 57,
                    correction: -3,
                    loop_start: 1,
                    loop_end: 4,
                    sample_type: SAMPLE_TYPE_MONO,
                    link: 0,
                },
                Sf2Sample {
                    name: "noise".into(),
                    frames: vec![7; 9],
                    sample_rate: 22050,
                    original_key: 60,
                    correction: 0,
                    loop_start: 0,
                    loop_end: 9,
                    sample_type: SAMPLE_TYPE_MONO,
                    link: 0,
                },
            ],
        }
    }

    #[test]
    fn write_read_preserves_every_record() {
        let font = test_font();
        let mut bytes = Vec::new();
        RiffCodec.write(&font, &mut bytes).unwrap();
        let round = RiffCodec.read(&bytes).unwrap();
        assert_eq!(round, font);
    }

    #[test]
    fn second_sample_survives_the_pool_gap() {
        let font = test_font();
        let mut bytes = Vec::new();
        RiffCodec.write(&font, &mut bytes).unwrap();
        let round = RiffCodec.read(&bytes).unwrap();
        assert_eq!(round.samples[1].frames, vec![7; 9]);
        assert_eq!(round.samples[0].loop_start, 1);
        assert_eq!(round.samples[0].loop_end, 4);
    }

    #[test]
    fn long_names_are_capped_at_nineteen_bytes() {
        let mut font = test_font();
        font.presets[0].name = "An Extremely Long Preset Name".into();
        let mut bytes = Vec::new();
        RiffCodec.write(&font, &mut bytes).unwrap();
        let round = RiffCodec.read(&bytes).unwrap();
        assert_eq!(round.presets[0].name, "An Extremely Long P");
    }

    #[test]
    fn garbage_and_truncation_are_errors() {
        assert!(RiffCodec.read(b"FORM....E4B0").is_err());
        assert!(RiffCodec.read(b"").is_err());
        let font = test_font();
        let mut bytes = Vec::new();
        RiffCodec.write(&font, &mut bytes).unwrap();
        assert!(RiffCodec.read(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn missing_hydra_chunk_is_an_error() {
        // a structurally valid sfbk with empty lists lacks the hydra
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(b"sfbk");
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(b"pdta");
        let err = RiffCodec.read(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
