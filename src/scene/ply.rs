use crate::error::{Result, SplatError};
use crate::scene::gaussian::{GaussianPoint, GaussianScene, ShDegree};
use std::collections::HashMap;
use std::io::Write;

const HEADER_TERMINATOR: &[u8] = b"end_header\n";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PropertyType {
    Float,
    Double,
    Uchar,
}

impl PropertyType {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "float" | "float32" => Ok(PropertyType::Float),
            "double" | "float64" => Ok(PropertyType::Double),
            "uchar" | "uint8" => Ok(PropertyType::Uchar),
            _ => Err(SplatError::malformed(format!(
                "unsupported property type '{s}'"
            ))),
        }
    }

    fn size(self) -> usize {
        match self {
            PropertyType::Float => 4,
            PropertyType::Double => 8,
            PropertyType::Uchar => 1,
        }
    }

    fn read(self, bytes: &[u8]) -> f32 {
        match self {
            PropertyType::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            PropertyType::Double => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(raw) as f32
            }
            PropertyType::Uchar => bytes[0] as f32 / 255.0,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Property {
    ty: PropertyType,
    offset: usize,
}

/// Vertex element layout declared by a PLY header.
#[derive(Debug)]
pub struct PlyHeader {
    pub vertex_count: usize,
    record_size: usize,
    properties: HashMap<String, Property>,
}

impl PlyHeader {
    pub fn rest_fields(&self) -> usize {
        let mut count = 0;
        while self.properties.contains_key(&format!("f_rest_{count}")) {
            count += 1;
        }
        count
    }

    pub fn sh_degree(&self) -> Result<ShDegree> {
        ShDegree::from_rest_fields(self.rest_fields())
    }

    fn property(&self, name: &str) -> Result<Property> {
        self.properties
            .get(name)
            .copied()
            .ok_or_else(|| SplatError::malformed(format!("missing vertex property '{name}'")))
    }
}

/// Split `bytes` into the parsed header and the body that follows it.
pub fn parse_header(bytes: &[u8]) -> Result<(PlyHeader, &[u8])> {
    let end = bytes
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .ok_or_else(|| SplatError::malformed("missing end_header"))?;
    let header = std::str::from_utf8(&bytes[..end])
        .map_err(|_| SplatError::malformed("header is not valid text"))?;
    let body = &bytes[end + HEADER_TERMINATOR.len()..];

    let mut lines = header.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("ply") {
        return Err(SplatError::malformed("not a PLY file"));
    }

    let mut format_seen = false;
    let mut vertex_count = None;
    let mut in_vertex = false;
    let mut record_size = 0usize;
    let mut properties = HashMap::new();

    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["format", "binary_little_endian", "1.0"] => format_seen = true,
            ["format", other, _] => {
                return Err(SplatError::malformed(format!(
                    "unsupported body format '{other}', expected binary_little_endian"
                )));
            }
            ["comment", ..] | ["obj_info", ..] => {}
            ["element", name, count] => {
                if vertex_count.is_some() {
                    // Elements after the vertex block would shift the body layout.
                    return Err(SplatError::malformed(format!(
                        "unexpected element '{name}' after vertex"
                    )));
                }
                if *name != "vertex" {
                    return Err(SplatError::malformed(format!(
                        "unexpected element '{name}' before vertex"
                    )));
                }
                let count = count
                    .parse()
                    .map_err(|_| SplatError::malformed(format!("bad vertex count '{count}'")))?;
                vertex_count = Some(count);
                in_vertex = true;
            }
            ["property", "list", ..] => {
                return Err(SplatError::malformed("list properties are not supported"));
            }
            ["property", ty, name] => {
                if !in_vertex {
                    return Err(SplatError::malformed("property outside of an element"));
                }
                let ty = PropertyType::parse(ty)?;
                properties.insert(
                    name.to_string(),
                    Property {
                        ty,
                        offset: record_size,
                    },
                );
                record_size += ty.size();
            }
            _ => {
                return Err(SplatError::malformed(format!(
                    "unsupported header line '{line}'"
                )));
            }
        }
    }

    if !format_seen {
        return Err(SplatError::malformed("missing format line"));
    }
    let vertex_count = vertex_count.ok_or_else(|| SplatError::malformed("missing vertex element"))?;
    Ok((
        PlyHeader {
            vertex_count,
            record_size,
            properties,
        },
        body,
    ))
}

/// Decode a whole scene file held in memory.
pub fn read_ply(bytes: &[u8]) -> Result<GaussianScene> {
    let (header, body) = parse_header(bytes)?;
    let sh_degree = header.sh_degree()?;
    let expected = header
        .vertex_count
        .checked_mul(header.record_size)
        .ok_or_else(|| SplatError::malformed("vertex data size overflows"))?;
    if body.len() < expected {
        return Err(SplatError::malformed(format!(
            "body holds {} bytes, header declares {expected}",
            body.len()
        )));
    }

    let lookup = |names: &[&str]| -> Result<Vec<Property>> {
        names.iter().map(|n| header.property(n)).collect()
    };
    let position = lookup(&["x", "y", "z"])?;
    let log_scale = lookup(&["scale_0", "scale_1", "scale_2"])?;
    let rotation = lookup(&["rot_0", "rot_1", "rot_2", "rot_3"])?;
    let opacity = header.property("opacity")?;
    let dc = lookup(&["f_dc_0", "f_dc_1", "f_dc_2"])?;
    let rest: Vec<Property> = (0..sh_degree.rest_fields())
        .map(|i| header.property(&format!("f_rest_{i}")))
        .collect::<Result<_>>()?;
    let rest_per_channel = rest.len() / 3;

    let points = body[..expected]
        .chunks_exact(header.record_size.max(1))
        .take(header.vertex_count)
        .map(|record| {
            let get = |p: &Property| p.ty.read(&record[p.offset..]);
            let mut sh = Vec::with_capacity(sh_degree.coeff_count());
            sh.push([get(&dc[0]), get(&dc[1]), get(&dc[2])]);
            // f_rest is stored channel-major: all red coefficients, then green, then blue.
            for i in 0..rest_per_channel {
                sh.push([
                    get(&rest[i]),
                    get(&rest[rest_per_channel + i]),
                    get(&rest[2 * rest_per_channel + i]),
                ]);
            }
            GaussianPoint {
                position: [get(&position[0]), get(&position[1]), get(&position[2])],
                log_scale: [get(&log_scale[0]), get(&log_scale[1]), get(&log_scale[2])],
                rotation: [
                    get(&rotation[0]),
                    get(&rotation[1]),
                    get(&rotation[2]),
                    get(&rotation[3]),
                ],
                opacity_logit: get(&opacity),
                sh,
            }
        })
        .collect();

    GaussianScene::new(sh_degree, points)
}

/// Encode a scene as binary little-endian PLY with float properties.
pub fn write_ply<W: Write>(scene: &GaussianScene, mut out: W) -> Result<()> {
    let rest_fields = scene.sh_degree.rest_fields();
    writeln!(out, "ply")?;
    writeln!(out, "format binary_little_endian 1.0")?;
    writeln!(out, "element vertex {}", scene.len())?;
    for name in ["x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2"] {
        writeln!(out, "property float {name}")?;
    }
    for i in 0..rest_fields {
        writeln!(out, "property float f_rest_{i}")?;
    }
    writeln!(out, "property float opacity")?;
    for name in ["scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3"] {
        writeln!(out, "property float {name}")?;
    }
    writeln!(out, "end_header")?;

    let per_channel = rest_fields / 3;
    let mut record = Vec::with_capacity((10 + 4 + rest_fields) * 4);
    for point in &scene.points {
        record.clear();
        let mut push = |v: f32| record.extend_from_slice(&v.to_le_bytes());
        point.position.iter().for_each(|&v| push(v));
        point.sh[0].iter().for_each(|&v| push(v));
        for channel in 0..3 {
            for i in 0..per_channel {
                push(point.sh[i + 1][channel]);
            }
        }
        push(point.opacity_logit);
        point.log_scale.iter().for_each(|&v| push(v));
        point.rotation.iter().for_each(|&v| push(v));
        out.write_all(&record)?;
    }
    Ok(())
}
