//! Ingest path: table-of-contents parsing over a plain image file and
//! over an authenticated (encrypted) drive emulation.

use std::io::Write;

use dsdmeta::AlbumInfo;
use dsdsacd::testkit::{ImageBuilder, ScriptedDrive};
use dsdsacd::{Area, AuthenticatedDriveSource, ImageFileSource, SacdReader};

fn fixture_image() -> Vec<u8> {
    ImageBuilder::new(2_822_400, 2)
        .album(AlbumInfo {
            title: Some("Fixture Album".into()),
            artist: Some("Fixture Artist".into()),
            publisher: Some("Fixture Label".into()),
            genre: Some("Test".into()),
            year: Some(2004),
            ..Default::default()
        })
        .track("First", "Fixture Artist", Some("USRC17607839"), 150)
        .track("Second", "Fixture Artist", None, 225)
        .track("Third", "Fixture Artist", None, 75)
        .build()
}

#[test]
fn image_file_toc_parses_album_and_tracks() {
    let image = fixture_image();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&image).unwrap();

    let source = ImageFileSource::open(file.path()).unwrap();
    let reader = SacdReader::open(source).unwrap();

    let album = reader.album_info();
    assert_eq!(album.title.as_deref(), Some("Fixture Album"));
    assert_eq!(album.artist.as_deref(), Some("Fixture Artist"));
    assert_eq!(album.year, Some(2004));

    assert!(reader.area(Area::Multichannel).is_none());
    let area = reader.area(Area::Stereo).unwrap();
    assert_eq!(area.track_count(), 3);
    assert_eq!(area.sample_rate, 2_822_400);

    let track2 = area.track_info(2).unwrap();
    assert_eq!(track2.title.as_deref(), Some("Second"));
    assert_eq!(track2.start_frames, 150);
    assert_eq!(track2.duration_frames, 225);
    assert_eq!(track2.number, 2);
    assert_eq!(track2.total, 3);

    let track1 = area.track_info(1).unwrap();
    assert_eq!(track1.isrc.as_ref().unwrap().as_str(), "USRC17607839");

    assert!(area.track_info(0).is_err());
    assert!(area.track_info(4).is_err());
}

#[test]
fn authenticated_drive_reads_the_same_bytes_as_the_plain_image() {
    let image = fixture_image();

    // Plain read.
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&image).unwrap();
    let mut plain_reader =
        SacdReader::open(ImageFileSource::open(file.path()).unwrap()).unwrap();

    // Encrypted read through the drive emulation.
    let drive = ScriptedDrive::new(&image, [0x42; 16]);
    let source = AuthenticatedDriveSource::open(drive).unwrap();
    let mut drive_reader = SacdReader::open(source).unwrap();

    assert_eq!(
        plain_reader.album_info().title,
        drive_reader.album_info().title
    );

    let mut plain_audio = vec![0u8; 40_000];
    let mut drive_audio = vec![0u8; 40_000];
    let a = plain_reader
        .read_area_audio(Area::Stereo, 1_000, &mut plain_audio)
        .unwrap();
    let b = drive_reader
        .read_area_audio(Area::Stereo, 1_000, &mut drive_audio)
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(plain_audio[..a], drive_audio[..b]);
}

#[test]
fn truncated_image_is_rejected() {
    let image = fixture_image();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    // Cut the image off in the middle of the master TOC.
    file.write_all(&image[..400 * 2048]).unwrap();

    let source = ImageFileSource::open(file.path()).unwrap();
    assert!(SacdReader::open(source).is_err());
}
