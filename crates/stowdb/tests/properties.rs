mod common;

use common::{Caption, Employee, Env};
use proptest::prelude::*;
use stowdb::prelude::*;

fn padded() -> impl Strategy<Value = String> {
    (" {0,4}", "[a-zA-Z][a-zA-Z ]{0,10}[a-zA-Z]", " {0,4}")
        .prop_map(|(lead, body, tail)| format!("{lead}{body}{tail}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn trim_matches_str_trimming(text in padded()) {
        let env = Env::new();
        let ctx = TxContext::none();
        let caption = env.cache.new_entity::<Caption>().unwrap();
        for field in ["both", "start", "end"] {
            caption.record().set(&ctx, field, text.as_str()).unwrap();
        }
        let key = env.cache.create(&ctx, &caption).unwrap();
        env.cache.clear_cache(&ctx).unwrap();

        let reread = env.cache.read::<Caption>(&ctx, &key).unwrap().unwrap();
        let get = |field| reread.record().get(&ctx, field).unwrap();

        prop_assert_eq!(get("both"), Value::from(text.trim()));
        prop_assert_eq!(get("start"), Value::from(text.trim_start()));
        prop_assert_eq!(get("end"), Value::from(text.trim_end()));
    }

    #[test]
    fn location_round_trips(x in any::<i64>(), y in any::<i64>()) {
        let env = Env::new();
        let ctx = TxContext::none();
        let employee = env.employee("Ada");
        employee.set_location(&ctx, x, y).unwrap();
        let key = env.cache.create(&ctx, &employee).unwrap();
        env.cache.clear_cache(&ctx).unwrap();

        let reread = env.cache.read::<Employee>(&ctx, &key).unwrap().unwrap();
        prop_assert_eq!(
            reread.record().get(&ctx, "location").unwrap(),
            Value::record([("x", x), ("y", y)])
        );
    }
}
