mod common;

use std::rc::Rc;

use storage_graph::{Document, GraphConfig, Segment, SegmentLayout};
use storage_models::{BlockDevice, Format};
use storage_testing::dump::Selection;

use common::{BUNDLED_SPECS, lab, lab_with, tree};

#[test]
fn bundled_specs_reload_unchanged() {
    let lab = lab();
    for name in BUNDLED_SPECS {
        let source = tree(name);
        let trip = lab.round_trip(&source).unwrap();

        assert!(
            trip.is_identical(),
            "{name} differs: {:?}",
            trip.first_difference()
        );
        assert!(!trip.import_report.has_errors(), "{name}: {}", trip.import_report);
        assert!(!trip.export_report.has_errors(), "{name}: {}", trip.export_report);
        assert_eq!(trip.devices, source.len());
    }
}

#[test]
fn selected_dumps_reload_unchanged() {
    let lab = lab();
    for name in BUNDLED_SPECS {
        let source = tree(name);
        for device in source.devices() {
            for recursive in [false, true] {
                let selection = Selection::new(device.name(), recursive);
                let label = format!("{name}/{} recursive={recursive}", device.name());
                let trip = lab.round_trip_selected(&source, Some(&selection)).unwrap();

                assert!(trip.is_identical(), "{label} differs: {:?}", trip.first_difference());
                assert!(!trip.import_report.has_errors(), "{label}: {}", trip.import_report);
                assert_eq!(
                    trip.devices,
                    source.select(device.name(), recursive).len(),
                    "{label}"
                );
            }
        }
    }
}

#[test]
fn exporting_twice_gives_identical_bytes() {
    let lab = lab();
    let source = tree("lvm");
    let first = lab.export_tree(&source, None).unwrap();
    let second = lab.export_tree(&source, None).unwrap();
    assert_eq!(
        lab.to_xml(&first.document).unwrap(),
        lab.to_xml(&second.document).unwrap()
    );
}

#[test]
fn compact_and_two_segment_dumps_also_reload_unchanged() {
    let configs = [
        GraphConfig {
            indent: 0,
            ..GraphConfig::default()
        },
        GraphConfig {
            layout: SegmentLayout::TwoSegment,
            ..GraphConfig::default()
        },
    ];
    for config in configs {
        let lab = lab_with(config.clone());
        let trip = lab.round_trip(&tree("lvm")).unwrap();
        assert!(trip.is_identical(), "{config:?}: {:?}", trip.first_difference());
    }

    let compact = lab_with(GraphConfig {
        indent: 0,
        ..GraphConfig::default()
    });
    let outcome = compact.export_tree(&tree("2disk"), None).unwrap();
    let xml = compact.to_xml(&outcome.document).unwrap();
    assert_eq!(xml.lines().count(), 1);
}

#[test]
fn reloaded_tree_keeps_structure() {
    let lab = lab();
    let source = tree("lvm");
    let exported = lab.export_tree(&source, None).unwrap();
    let xml = lab.to_xml(&exported.document).unwrap();
    let (rebuilt, outcome) = lab.import(&Document::from_xml_str(&xml).unwrap());

    assert_eq!(outcome.devices, source.len());
    let names = |tree: &storage_models::DeviceTree| -> Vec<String> {
        tree.devices().iter().map(|device| device.name().to_string()).collect()
    };
    assert_eq!(names(&rebuilt), names(&source));
    for (before, after) in source.devices().iter().zip(rebuilt.devices()) {
        assert_eq!(before.core().size, after.core().size);
        assert_eq!(before.core().uuid, after.core().uuid);
        assert_eq!(before.type_name(), after.type_name());
    }

    let Some(BlockDevice::VolumeGroup(vg)) = rebuilt.get_by_name("vg0") else {
        panic!("vg0 missing");
    };
    assert_eq!(vg.members.len(), 2);
    assert_eq!(vg.pv_free.len(), 2);

    // The PV format of vda2 and the group's first member are one object
    let Some(Format::PhysicalVolume(pv)) = rebuilt.get_by_name("vda2").unwrap().core().format.clone()
    else {
        panic!("vda2 lost its physical volume");
    };
    assert!(Rc::ptr_eq(&pv, &vg.members[0]));
    assert_eq!(pv.vg_name.as_deref(), Some("vg0"));

    let Some(BlockDevice::LogicalVolume(data)) = rebuilt.get_by_name("vg0-data") else {
        panic!("vg0-data missing");
    };
    assert_eq!(data.copies, 2);
    let tags: Vec<_> = data.tags.keys().map(String::as_str).collect();
    assert_eq!(tags, ["owner", "role"]);
    assert!(Rc::ptr_eq(&data.vg().unwrap(), vg));

    let Some(BlockDevice::Disk(vda)) = rebuilt.get_by_name("vda") else {
        panic!("vda missing");
    };
    let partitions = vda.partitions();
    assert_eq!(partitions.len(), 2);
    assert!(Rc::ptr_eq(&partitions[1].disk().unwrap(), vda));
}

#[test]
fn documents_survive_a_trip_through_a_file() {
    let lab = lab();
    let exported = lab.export_tree(&tree("raid-luks"), None).unwrap();
    let path = std::env::temp_dir().join(format!("storage-graph-{}.xml", std::process::id()));

    exported.document.write(&path).unwrap();
    let reread = Document::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(reread, exported.document);
    for segment in Segment::ALL {
        assert_eq!(reread.declared_count(segment), Some(reread.count(segment)));
    }
}
