use aes_prng::AesRng;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bgv_fhe::{
    BgvEngine, BgvError, BgvParams, EngineTables, SchemeFeature, SecurityLevel, SerialFormat,
};
use rand::SeedableRng;

fn engine() -> BgvEngine {
    BgvEngine::from_tables(EngineTables::generate(3, 60, 1 << 15).unwrap()).unwrap()
}

#[test]
fn public_key_survives_base64_transport() {
    let mut rng = AesRng::seed_from_u64(2024);
    let engine = engine();
    let mut cc = engine.gen_crypto_context(&BgvParams::default()).unwrap();
    cc.enable(SchemeFeature::Pke);
    cc.enable(SchemeFeature::LeveledShe);
    let keys = cc.keygen(&mut rng).unwrap();

    let bytes = cc
        .serialize_public_key(&keys.public_key, SerialFormat::Binary)
        .unwrap();
    let text = STANDARD.encode(&bytes);
    let decoded = STANDARD.decode(text).unwrap();
    assert_eq!(decoded, bytes);

    let pk = cc.deserialize_public_key(&decoded, SerialFormat::Binary).unwrap();
    assert_eq!(pk, keys.public_key);

    let values: Vec<i64> = (1..=16).collect();
    let pt = cc.make_packed_plaintext(&values).unwrap();
    let ct = cc.encrypt(&pk, &pt, &mut rng).unwrap();
    let mut dec = cc.decrypt(&keys.secret_key, &ct).unwrap();
    dec.set_length(values.len());
    assert_eq!(dec.values(), values.as_slice());

    cc.release();
    assert_eq!(engine.live_contexts(), 0);
}

#[test]
fn ciphertext_roundtrip_in_json() {
    let mut rng = AesRng::seed_from_u64(7);
    let engine = engine();
    let params = BgvParams::builder()
        .security_level(SecurityLevel::HEStdNotSet)
        .ring_dim(256)
        .build();
    let mut cc = engine.gen_crypto_context(&params).unwrap();
    cc.enable(SchemeFeature::Pke);
    let keys = cc.keygen(&mut rng).unwrap();
    let pt = cc.make_coef_packed_plaintext(&[5, -5, 0, 42]).unwrap();
    let ct = cc.encrypt(&keys.public_key, &pt, &mut rng).unwrap();

    let bytes = cc.serialize_ciphertext(&ct, SerialFormat::Json).unwrap();
    let restored = cc.deserialize_ciphertext(&bytes, SerialFormat::Json).unwrap();
    let mut dec = cc.decrypt(&keys.secret_key, &restored).unwrap();
    dec.set_length(4);
    assert_eq!(dec.values(), &[5, -5, 0, 42]);

    // a ciphertext is not a public key
    assert!(matches!(
        cc.deserialize_public_key(&bytes, SerialFormat::Json),
        Err(BgvError::Deserialization(_))
    ));
}

#[test]
fn public_key_from_other_parameters_is_rejected() {
    let mut rng = AesRng::seed_from_u64(8);
    let engine = engine();
    let mut cc = engine.gen_crypto_context(&BgvParams::default()).unwrap();
    cc.enable(SchemeFeature::Pke);
    let keys = cc.keygen(&mut rng).unwrap();
    let bytes = cc
        .serialize_public_key(&keys.public_key, SerialFormat::Binary)
        .unwrap();

    let shallow = BgvParams::builder().multiplicative_depth(1).build();
    let other = engine.gen_crypto_context(&shallow).unwrap();
    assert!(matches!(
        other.deserialize_public_key(&bytes, SerialFormat::Binary),
        Err(BgvError::ContextMismatch(_))
    ));
    assert_eq!(engine.live_contexts(), 2);
}
