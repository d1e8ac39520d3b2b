#![allow(dead_code)]
use std::collections::BTreeSet;

use mesh_dart::data::TypedHandle;
use mesh_dart::{Mesh, MeshKind, PrimitiveType};

/// Grid vertex id.
pub fn gid(nx: usize, i: usize, j: usize) -> usize {
    j * (nx + 1) + i
}

/// `nx` by `ny` squares, each cut along its rising diagonal, with a 2D
/// `position` attribute at integer coordinates. All triangles are ccw.
pub fn grid(nx: usize, ny: usize) -> (Mesh, TypedHandle<f64>) {
    let mut cells = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let (a, b) = (gid(nx, i, j), gid(nx, i + 1, j));
            let (c, d) = (gid(nx, i, j + 1), gid(nx, i + 1, j + 1));
            cells.push([a, b, d]);
            cells.push([a, d, c]);
        }
    }
    let n = (nx + 1) * (ny + 1);
    let mut mesh = Mesh::from_cells(MeshKind::Triangle, n, &cells).unwrap();
    let pos = mesh
        .register_attribute("position", PrimitiveType::Vertex, &[0.0f64; 2])
        .unwrap();
    {
        let mut acc = mesh.create_accessor_mut(&pos).unwrap();
        for j in 0..=ny {
            for i in 0..=nx {
                acc.set_row(gid(nx, i, j), &[i as f64, j as f64]).unwrap();
            }
        }
    }
    (mesh, pos)
}

/// Two triangles sharing edge (1, 3).
pub fn quad() -> Mesh {
    Mesh::from_cells(MeshKind::Triangle, 4, &[[0, 1, 3], [1, 2, 3]]).unwrap()
}

/// Set a row of every listed vertex.
pub fn place(mesh: &mut Mesh, pos: &TypedHandle<f64>, coords: &[&[f64]]) {
    let mut acc = mesh.create_accessor_mut(pos).unwrap();
    for (v, c) in coords.iter().enumerate() {
        acc.set_row(v, c).unwrap();
    }
}

/// Top-level cells as sorted vertex lists.
pub fn cell_sets(mesh: &Mesh) -> BTreeSet<Vec<usize>> {
    let top = mesh.kind().top_primitive();
    mesh.get_all(top)
        .iter()
        .map(|t| mesh.simplex(t, top).unwrap().vertices().to_vec())
        .collect()
}

/// Cells as sorted lists of rounded vertex positions: equal for meshes that
/// differ only by vertex numbering.
pub fn geometric_cells(mesh: &Mesh, pos: &TypedHandle<f64>) -> BTreeSet<Vec<Vec<i64>>> {
    let acc = mesh.create_accessor(pos).unwrap();
    let top = mesh.kind().top_primitive();
    mesh.get_all(top)
        .iter()
        .map(|t| {
            let mut pts: Vec<Vec<i64>> = mesh
                .simplex(t, top)
                .unwrap()
                .vertices()
                .iter()
                .map(|&v| {
                    acc.row(v)
                        .unwrap()
                        .iter()
                        .map(|x| (x * 1e6).round() as i64)
                        .collect()
                })
                .collect();
            pts.sort();
            pts
        })
        .collect()
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
