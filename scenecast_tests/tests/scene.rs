//! Producer-to-renderer tests: commands packed by a `Visualizer`, decoded on
//! the client side.

mod common;

use std::sync::Arc;

use scenecast_server::Visualizer;
use scenecast_shared::{
    buffer::NumericArray,
    commands::CommandDoc,
    geometry::{Geometry, GeometryDoc},
    material::{Material, MaterialDoc},
    math::{Quat, Vec3},
    net::decode_from_bytes,
    object::{Object, ObjectType},
};

use common::{connect, init_tracing, next_binary, start_pool, wait_for_connections};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transform_reaches_renderer() -> anyhow::Result<()> {
    init_tracing();
    let vis = Visualizer::new(start_pool(1000)?);
    let mut ws = connect(vis.pool()).await?;
    wait_for_connections(vis.pool(), 1).await?;

    let robot = vis.at("robot");
    let report = tokio::task::spawn_blocking(move || {
        robot.set_transform(
            Some(Vec3::new(1.0, 2.0, 3.0)),
            Some(Quat::from_xyzw(0.0, 0.0, 0.0, 1.0)),
        )
    })
    .await??;
    assert_eq!(report.delivered, 1);

    let doc = decode_from_bytes(&next_binary(&mut ws).await?)?;
    assert_eq!(
        doc.commands,
        vec![CommandDoc::SetTransform {
            path: ["scenecast", "robot"].into(),
            position: [1.0, 2.0, 3.0],
            quaternion: [0.0, 0.0, 0.0, 1.0],
        }]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn box_object_then_delete() -> anyhow::Result<()> {
    init_tracing();
    let vis = Visualizer::new(start_pool(1000)?);
    let mut ws = connect(vis.pool()).await?;
    wait_for_connections(vis.pool(), 1).await?;

    let body = vis.at("body");
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        body.set_object(Object::mesh(
            Geometry::cuboid([1.0, 1.0, 1.0]),
            Material::basic(0xff0000),
        ))?;
        body.delete()?;
        Ok(())
    })
    .await??;

    let first = decode_from_bytes(&next_binary(&mut ws).await?)?;
    let CommandDoc::SetObject { path, object } = &first.commands[0] else {
        panic!("expected set_object, got {:?}", first.commands);
    };
    assert_eq!(path.to_string(), "/scenecast/body");
    assert_eq!(object.object.object_type, ObjectType::Mesh);
    assert!(matches!(
        object.geometries[0],
        GeometryDoc::Box { width, .. } if width == 1.0
    ));
    match &object.materials[0] {
        MaterialDoc::MeshBasic(m) => assert_eq!(m.color, 0xff0000),
        other => panic!("unexpected material {other:?}"),
    }

    let second = decode_from_bytes(&next_binary(&mut ws).await?)?;
    assert_eq!(
        second.commands,
        vec![CommandDoc::Delete {
            path: ["scenecast", "body"].into()
        }]
    );
    Ok(())
}

/// Point buffers travel as Float32Array extension values (code 0x17).
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn point_cloud_carries_float_extension() -> anyhow::Result<()> {
    init_tracing();
    let vis = Arc::new(Visualizer::new(start_pool(1000)?));
    let mut ws = connect(vis.pool()).await?;
    wait_for_connections(vis.pool(), 1).await?;

    let positions: Vec<f32> = (0..30).map(|i| i as f32 * 0.1).collect();
    let cloud = Object::point_cloud(NumericArray::matrix(positions, 3, 10)?, None, 0.02);
    let sender = Arc::clone(&vis);
    tokio::task::spawn_blocking(move || sender.at("cloud").set_object(cloud)).await??;

    let bytes = next_binary(&mut ws).await?;
    // ext 8: 0xc7, 120 payload bytes, type 0x17
    assert!(bytes.windows(3).any(|w| w == [0xc7, 120, 0x17]));
    Ok(())
}
