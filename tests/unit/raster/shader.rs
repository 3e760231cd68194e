use super::*;

#[test]
fn id_depends_on_name_and_defines() {
    let a = ShaderVariant::new("KBufferGather").define("MAX_NUM_NODES", 8);
    let b = ShaderVariant::new("KBufferGather").define("MAX_NUM_NODES", 16);
    let c = ShaderVariant::new("MlabGather").define("MAX_NUM_NODES", 8);
    assert_ne!(a.id(), b.id());
    assert_ne!(a.id(), c.id());
    assert_eq!(a.id(), a.clone().id());
}

#[test]
fn define_order_does_not_change_id() {
    let a = ShaderVariant::new("S").define("A", 1).define("B", 2);
    let b = ShaderVariant::new("S").define("B", 2).define("A", 1);
    assert_eq!(a.id(), b.id());
    assert_eq!(a.to_string(), "S A=1 B=2");
}
