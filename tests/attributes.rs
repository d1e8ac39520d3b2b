mod util;

use std::collections::BTreeMap;

use mesh_dart::prelude::*;
use util::{cell_sets, geometric_cells, grid, quad};

#[test]
fn registration_conflicts_and_lookups() {
    let mut mesh = quad();
    let h = mesh
        .register_attribute("quality", PrimitiveType::Face, &[1.0f64])
        .unwrap();
    // same name, type and stride: same handle
    let again = mesh
        .register_attribute("quality", PrimitiveType::Face, &[0.0f64])
        .unwrap();
    assert_eq!(h, again);
    // same name on another primitive is a different attribute
    mesh.register_attribute("quality", PrimitiveType::Edge, &[0i32])
        .unwrap();

    assert_eq!(
        mesh.register_attribute("quality", PrimitiveType::Face, &[0.0f64, 0.0])
            .unwrap_err(),
        MeshDartError::AttributeConflict {
            name: "quality".into(),
            primitive: PrimitiveType::Face,
        }
    );
    assert!(matches!(
        mesh.register_attribute("quality", PrimitiveType::Face, &[0u32]),
        Err(MeshDartError::AttributeConflict { .. })
    ));
    assert_eq!(
        mesh.get_attribute_handle::<f64>("missing", PrimitiveType::Vertex)
            .unwrap_err(),
        MeshDartError::AttributeMissing {
            name: "missing".into(),
            primitive: PrimitiveType::Vertex,
        }
    );
    assert!(matches!(
        mesh.get_attribute_handle::<i64>("quality", PrimitiveType::Face),
        Err(MeshDartError::AttributeTypeMismatch { .. })
    ));
    assert!(matches!(
        mesh.register_attribute("volume", PrimitiveType::Tetrahedron, &[0.0f64]),
        Err(MeshDartError::UnsupportedPrimitive { .. })
    ));
    assert_eq!(mesh.get_attribute_handle::<f64>("quality", PrimitiveType::Face).unwrap(), h);
}

#[test]
fn accessors_follow_tuples() {
    let mut mesh = quad();
    let tag = mesh
        .register_attribute("tag", PrimitiveType::Edge, &[0u32])
        .unwrap();
    let t = mesh.tuple_of(&SimplexKey::new(&[1, 3])).unwrap();
    mesh.create_accessor_mut(&tag)
        .unwrap()
        .set_scalar_attribute(&t, 7)
        .unwrap();
    // the same edge seen from the other triangle
    let across = mesh.switch(&t, PrimitiveType::Face).unwrap();
    let acc = mesh.create_accessor(&tag).unwrap();
    assert_eq!(acc.scalar_attribute(&across).unwrap(), 7);
    let on_other_edge = mesh.switch(&t, PrimitiveType::Edge).unwrap();
    assert_eq!(acc.scalar_attribute(&on_other_edge).unwrap(), 0);
}

#[derive(Default)]
struct Dump {
    rows: BTreeMap<(String, usize), Vec<f64>>,
    skipped: Vec<String>,
}

impl AttributeVisitor for Dump {
    fn begin_attribute(&mut self, handle: &AttributeHandle) -> bool {
        if handle.scalar_type() != ScalarType::F64 {
            self.skipped.push(handle.name().to_string());
            return false;
        }
        true
    }

    fn visit_row(&mut self, handle: &AttributeHandle, id: usize, row: AttributeRow<'_>) {
        if let AttributeRow::F64(values) = row {
            self.rows.insert((handle.name().to_string(), id), values.to_vec());
        }
    }
}

#[test]
fn visitor_streams_live_rows_after_edits() {
    let (mut mesh, pos) = grid(2, 1);
    mesh.register_attribute("flag", PrimitiveType::Vertex, &[0i64])
        .unwrap();
    let mut settings = OperationSettings::new();
    settings.set_transfer(&pos, Transfer::Mean);
    let t = mesh.tuple_of(&SimplexKey::new(&[0, 1])).unwrap();
    let done = Operation::new(OperationKind::Split, t, &settings)
        .execute(&mut mesh)
        .unwrap();
    let w = mesh.id(&done.representative, PrimitiveType::Vertex).unwrap();

    let mut dump = Dump::default();
    mesh.visit_attributes(&mut dump).unwrap();
    assert_eq!(dump.skipped, vec!["flag".to_string()]);
    assert_eq!(dump.rows.len(), 7);
    assert_eq!(dump.rows[&("position".to_string(), w)], vec![0.5, 0.0]);

    let streamed: Vec<usize> = mesh.stream_attribute(&pos).unwrap().map(|(id, _)| id).collect();
    assert_eq!(streamed, (0..7).collect::<Vec<_>>());
}

#[test]
fn consolidate_compacts_and_is_idempotent() {
    let (mut mesh, pos) = grid(3, 3);
    let mut settings = OperationSettings::new();
    settings.set_transfer(&pos, Transfer::Mean);
    let mut pass = ExecutePass::new(settings, SchedulerConfig::default())
        .unwrap()
        .with_reseeding(false);
    let candidates: Vec<_> = mesh
        .get_all(PrimitiveType::Edge)
        .into_iter()
        .map(|t| (OperationKind::Collapse, t))
        .collect();
    let report = pass.run(&mut mesh, candidates).unwrap();
    assert!(report.stats.succeeded > 0);
    assert!(!mesh.connectivity().free_ids(PrimitiveType::Vertex).is_empty());

    let stale = mesh.get_all(PrimitiveType::Face)[0];
    let geometry = geometric_cells(&mesh, &pos);
    let map = mesh.consolidate();
    assert!(!map.is_identity());
    assert!(!mesh.is_valid(&stale));
    for p in mesh.kind().primitives() {
        let live = mesh.connectivity().live_count(p);
        assert_eq!(mesh.connectivity().capacity(p), live, "{p:?}");
        assert!(mesh.connectivity().free_ids(p).is_empty());
        assert_eq!(map.new_to_old(p).len(), live);
    }
    assert_eq!(geometric_cells(&mesh, &pos), geometry);
    assert!(mesh.validate_invariants().is_ok());

    let cells = cell_sets(&mesh);
    let rows: Vec<Vec<f64>> = mesh
        .stream_attribute(&pos)
        .unwrap()
        .map(|(_, r)| r.to_vec())
        .collect();
    let second = mesh.consolidate();
    assert!(second.is_identity());
    assert_eq!(cell_sets(&mesh), cells);
    let again: Vec<Vec<f64>> = mesh
        .stream_attribute(&pos)
        .unwrap()
        .map(|(_, r)| r.to_vec())
        .collect();
    assert_eq!(again, rows);
}

#[test]
fn handles_serialize() {
    let mut mesh = quad();
    let h = mesh
        .register_attribute("velocity", PrimitiveType::Vertex, &[0.0f32; 3])
        .unwrap();
    let untyped = h.untyped().clone();
    let json = serde_json::to_string(&untyped).unwrap();
    let back: AttributeHandle = serde_json::from_str(&json).unwrap();
    assert_eq!(back, untyped);
    assert_eq!(back.stride(), 3);
    assert_eq!(back.scalar_type(), ScalarType::F32);
    assert_eq!(back.typed::<f32>(), Some(h));
    assert!(back.typed::<f64>().is_none());
}
