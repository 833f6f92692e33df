use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn tre_input() -> Vec<u8> {
    use gamearc_formats::tre::{CompressionMethod, TreWriter, TreWriterOptions};
    use std::io::{Cursor, Write};

    let mut writer = TreWriter::new(Cursor::new(Vec::new()), TreWriterOptions::builder().build());
    for index in 0..512 {
        writer.start_file(&format!("data/file_{index:04}.txt"), CompressionMethod::Zlib).unwrap();
        writer.write_all(format!("content of file {index}\n").repeat(32).as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub mod identify {
    use divan::Bencher;
    use gamearc_core::{ByteCursor, SourceLocation};
    use gamearc_formats::registry;

    #[divan::bench]
    fn score_all(bencher: Bencher) {
        let registry = registry();
        bencher
            .with_inputs(|| ByteCursor::from_bytes(super::tre_input()))
            .bench_refs(|cursor| {
                let source = SourceLocation::memory(cursor.len());
                divan::black_box(registry.identify(cursor, &source).len());
            });
    }
}

pub mod read {
    use divan::Bencher;
    use gamearc_core::{Archive, ByteCursor, DecodeOptions, SourceLocation};
    use gamearc_formats::registry;

    fn open(data: Vec<u8>) -> Archive {
        let length = data.len() as u64;
        registry()
            .open_as("tre", ByteCursor::from_bytes(data), SourceLocation::memory(length), DecodeOptions::default())
            .unwrap()
    }

    #[divan::bench]
    fn open_tre(bencher: Bencher) {
        bencher.with_inputs(super::tre_input).bench_values(|data| {
            divan::black_box(open(data));
        });
    }

    #[divan::bench(sample_count = 1)]
    fn read_file_all(bencher: Bencher) {
        let mut archive = open(super::tre_input());

        bencher.bench_local(move || {
            for index in 0..archive.len() {
                divan::black_box(archive.read_entry(index).unwrap());
            }
        });
    }
}

pub mod write {
    use divan::Bencher;
    use gamearc_core::{encode::EditedEntry, ByteCursor, DecodeOptions, SourceLocation};
    use gamearc_formats::registry;

    #[divan::bench(sample_count = 1)]
    fn reencode_tre(bencher: Bencher) {
        let data = super::tre_input();
        let length = data.len() as u64;
        let registry = registry();
        let mut archive = registry
            .open_as("tre", ByteCursor::from_bytes(data), SourceLocation::memory(length), DecodeOptions::default())
            .unwrap();
        let edited = archive.entries().iter().cloned().map(EditedEntry::original).collect::<Vec<_>>();

        bencher.bench_local(move || {
            divan::black_box(registry.encode(&mut archive, &edited).unwrap());
        });
    }
}
