#![no_main]

use blockdev_sim::MemoryBlockDevice;
use common::ControlOp;
use encryption::{EncryptingBlockDevice, IvMode, VolumeKey, VOLUME_KEY_SIZE};
use libfuzzer_sys::fuzz_target;

const BLOCK_SIZE: usize = 64;
const BLOCKS: u64 = 4;

// Input: 32 key bytes, one mode byte, then a stream of
// [opcode, block, offset, len, data...] records.
fuzz_target!(|data: &[u8]| {
    if data.len() < VOLUME_KEY_SIZE + 1 {
        return;
    }

    let mut key = [0u8; VOLUME_KEY_SIZE];
    key.copy_from_slice(&data[..VOLUME_KEY_SIZE]);
    let mode = if data[VOLUME_KEY_SIZE] & 1 == 0 {
        IvMode::CbcPlain
    } else {
        IvMode::CbcEssiv
    };

    let mut volume = match EncryptingBlockDevice::with_key(
        MemoryBlockDevice::new(BLOCK_SIZE, BLOCKS),
        VolumeKey::from_bytes(key),
        mode,
    ) {
        Ok(volume) => volume,
        Err(_) => return,
    };

    let mut model = vec![[0u8; BLOCK_SIZE]; BLOCKS as usize];
    for block in 0..BLOCKS {
        volume.erase(block).unwrap();
    }

    let mut ops = &data[VOLUME_KEY_SIZE + 1..];
    while ops.len() >= 4 {
        let (opcode, block, offset, len) = (ops[0], ops[1], ops[2] as usize, ops[3] as usize);
        ops = &ops[4..];
        let index = u64::from(block) % (BLOCKS + 1);
        let in_range = index < BLOCKS;
        let fits = offset + len <= BLOCK_SIZE;

        match opcode % 3 {
            0 => {
                let take = len.min(ops.len());
                let payload = &ops[..take];
                ops = &ops[take..];
                let result = volume.write(index, payload, offset);
                if in_range && offset + take <= BLOCK_SIZE {
                    result.unwrap();
                    model[index as usize][offset..offset + take].copy_from_slice(payload);
                } else {
                    assert!(result.is_err());
                }
            }
            1 => {
                let mut buf = vec![0u8; len];
                let result = volume.read(index, &mut buf, offset);
                if in_range && fits {
                    result.unwrap();
                    assert_eq!(&buf[..], &model[index as usize][offset..offset + len]);
                } else {
                    assert!(result.is_err());
                }
            }
            _ => {
                let result = volume.control(ControlOp::EraseBlock, index);
                if in_range {
                    assert_eq!(result.unwrap(), Some(0));
                    model[index as usize] = [0u8; BLOCK_SIZE];
                } else {
                    assert!(result.is_err());
                }
            }
        }
    }

    for (index, expected) in model.iter().enumerate() {
        let mut block = [0u8; BLOCK_SIZE];
        volume.read(index as u64, &mut block, 0).unwrap();
        assert_eq!(&block, expected);
    }
});
