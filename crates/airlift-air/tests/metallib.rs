use airlift_air::ir::{AttributeList, DataLayout, FlagBehavior, IrBuilder, Module};
use airlift_air::metallib::write_metallib;
use sha2::{Digest, Sha256};

fn read_u16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap())
}
fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
}
fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap())
}

/// Builds a module with one kernel function registered in `air.kernel`.
fn build_kernel_module(name: &str) -> Module {
    let mut module = Module::new("shader.air");
    module.source_file_name = "generated.metal".to_string();
    module.target_triple = "air64-apple-macosx14.0.0".to_string();
    module.data_layout = DataLayout::air();
    module.sdk_version = (14, 0);
    module.add_flag(FlagBehavior::Error, "wchar_size", 4);
    module.add_flag(FlagBehavior::Max, "frame-pointer", 2);

    let void = module.types.void();
    let fn_ty = module.types.func(void, vec![]);
    let func = module.get_or_insert_function(name, fn_ty, AttributeList::default());
    {
        let mut ir = IrBuilder::new(&mut module, func);
        ir.build_ret(None);
    }

    let func_ref = module.function_ref(func);
    let func_md = module.md_value(func_ref);
    let empty_out = module.md_tuple(vec![]);
    let empty_in = module.md_tuple(vec![]);
    let tuple = module.md_tuple(vec![func_md, empty_out, empty_in]);
    module.add_named_metadata_operand("air.kernel", tuple);
    module
}

#[test]
fn header_layout_is_fixed() {
    let module = build_kernel_module("cs_main");
    let bytes = write_metallib(&module).expect("write should succeed");

    assert_eq!(&bytes[0..4], b"MTLB");
    assert_eq!(read_u16(&bytes, 4), 0x8001); // platform: macOS
    assert_eq!(read_u16(&bytes, 6), 2); // container major
    assert_eq!(read_u16(&bytes, 8), 7); // container minor
    assert_eq!(bytes[10], 0x00); // executable
    assert_eq!(bytes[11], 0x81); // macOS
    assert_eq!(read_u16(&bytes, 12), 14);
    assert_eq!(read_u16(&bytes, 14), 4);
    assert_eq!(read_u64(&bytes, 16), bytes.len() as u64); // file size
    assert_eq!(read_u64(&bytes, 24), 88); // function list offset
}

#[test]
fn function_record_carries_name_type_and_hash() {
    let module = build_kernel_module("cs_main");
    let bytes = write_metallib(&module).expect("write should succeed");

    // Function list: u32 count, u32 size, then records.
    let list_offset = read_u64(&bytes, 24) as usize;
    assert_eq!(read_u32(&bytes, list_offset), 1);
    let mut pos = list_offset + 8;

    assert_eq!(&bytes[pos..pos + 4], b"NAME");
    let name_len = read_u16(&bytes, pos + 4) as usize;
    assert_eq!(&bytes[pos + 6..pos + 6 + name_len - 1], b"cs_main");
    assert_eq!(bytes[pos + 6 + name_len - 1], 0);
    pos += 6 + name_len;

    assert_eq!(&bytes[pos..pos + 4], b"TYPE");
    assert_eq!(read_u16(&bytes, pos + 4), 1);
    assert_eq!(bytes[pos + 6], 2); // kernel
    pos += 7;

    assert_eq!(&bytes[pos..pos + 4], b"HASH");
    assert_eq!(read_u16(&bytes, pos + 4), 0x20);
    let record_hash = &bytes[pos + 6..pos + 6 + 32];

    // The hash must be the SHA-256 of the embedded bitcode.
    let bitcode_offset = read_u64(&bytes, 72) as usize;
    let bitcode_size = read_u64(&bytes, 80) as usize;
    assert_eq!(bitcode_offset + bitcode_size, bytes.len());
    let bitcode = &bytes[bitcode_offset..bitcode_offset + bitcode_size];
    let expected: [u8; 32] = Sha256::digest(bitcode).into();
    assert_eq!(record_hash, expected);

    // Embedded bitcode starts with the 'BC' 0xC0DE magic.
    assert_eq!(&bitcode[0..2], b"BC");
    assert_eq!(bitcode[2], 0xC0);
    assert_eq!(bitcode[3], 0xDE);
}

#[test]
fn sections_are_contiguous() {
    let module = build_kernel_module("cs_main");
    let bytes = write_metallib(&module).expect("write should succeed");

    let list_offset = read_u64(&bytes, 24);
    let list_size = read_u64(&bytes, 32);
    let public_offset = read_u64(&bytes, 40);
    let public_size = read_u64(&bytes, 48);
    let private_offset = read_u64(&bytes, 56);
    let private_size = read_u64(&bytes, 64);
    let bitcode_offset = read_u64(&bytes, 72);

    // list + count word + extended-header ENDT precede public metadata.
    assert_eq!(public_offset, list_offset + list_size + 4 + 4);
    assert_eq!(private_offset, public_offset + public_size);
    assert_eq!(bitcode_offset, private_offset + private_size);

    // Private metadata for a single function is a u32 size + ENDT.
    let p = private_offset as usize;
    assert_eq!(read_u32(&bytes, p), 4);
    assert_eq!(&bytes[p + 4..p + 8], b"ENDT");
}

#[test]
fn output_is_deterministic() {
    let a = write_metallib(&build_kernel_module("cs_main")).unwrap();
    let b = write_metallib(&build_kernel_module("cs_main")).unwrap();
    assert_eq!(a, b);

    let c = write_metallib(&build_kernel_module("other")).unwrap();
    assert_ne!(a, c);
}
